//! Fixtures shared by unit tests

use crate::abi::BridgeAbi;
use crate::tx::TransactionRelayer;

use ethers::abi::{self, ParamType, Token};
use ethers::signers::LocalWallet;
use ethers::types::{Address, Bytes, Log, H256, U256};

/// Minimal Foundry artifact for the bridge contract
pub const BRIDGE_ARTIFACT: &str = r#"{
  "abi": [
    {
      "type": "event",
      "name": "Deposit",
      "anonymous": false,
      "inputs": [
        { "name": "from", "type": "address", "indexed": true },
        { "name": "toChainId", "type": "uint256", "indexed": true },
        { "name": "to", "type": "address", "indexed": true },
        { "name": "amount", "type": "uint256", "indexed": false },
        { "name": "nonce", "type": "uint256", "indexed": false }
      ]
    },
    {
      "type": "function",
      "name": "receiveFromOtherChain",
      "stateMutability": "nonpayable",
      "inputs": [
        { "name": "to", "type": "address" },
        { "name": "amount", "type": "uint256" },
        { "name": "nonce", "type": "uint256" }
      ],
      "outputs": []
    }
  ]
}"#;

/// Well-known development key; never holds funds
pub const TEST_PRIVATE_KEY: &str =
    "0x4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318";

pub fn bridge_abi() -> BridgeAbi {
    BridgeAbi::from_artifact_json(BRIDGE_ARTIFACT).expect("fixture artifact is valid")
}

pub fn test_wallet() -> LocalWallet {
    TransactionRelayer::load_wallet(TEST_PRIVATE_KEY).expect("fixture key is valid")
}

pub fn sender() -> Address {
    Address::repeat_byte(0xaa)
}

pub fn recipient() -> Address {
    Address::repeat_byte(0xbb)
}

pub fn address_topic(address: Address) -> H256 {
    H256::from(address)
}

pub fn uint_topic(value: u64) -> H256 {
    let mut bytes = [0u8; 32];
    U256::from(value).to_big_endian(&mut bytes);
    H256::from(bytes)
}

/// A deposit log as the source bridge would emit it
pub fn deposit_log(destination_chain_id: u64, amount: u64, nonce: u64) -> Log {
    Log {
        address: Address::repeat_byte(0x11),
        topics: vec![
            bridge_abi().deposit_signature(),
            address_topic(sender()),
            uint_topic(destination_chain_id),
            address_topic(recipient()),
        ],
        data: Bytes::from(abi::encode(&[
            Token::Uint(U256::from(amount)),
            Token::Uint(U256::from(nonce)),
        ])),
        block_number: Some(100u64.into()),
        transaction_hash: Some(H256::repeat_byte(0x01)),
        ..Default::default()
    }
}

/// Split `receiveFromOtherChain` calldata back into its arguments
pub fn decode_receive_call(calldata: &[u8]) -> (Address, U256, U256) {
    let tokens = abi::decode(
        &[ParamType::Address, ParamType::Uint(256), ParamType::Uint(256)],
        &calldata[4..],
    )
    .expect("calldata decodes");
    match tokens.as_slice() {
        [Token::Address(to), Token::Uint(amount), Token::Uint(nonce)] => (*to, *amount, *nonce),
        other => panic!("unexpected tokens: {:?}", other),
    }
}
