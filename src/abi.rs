//! Bridge contract interface loaded from a Foundry build artifact

use crate::error::{RelayerError, RelayerResult};

use ethers::abi::{self, Abi, Event, Function, ParamType, Token};
use ethers::types::{Address, Bytes, H256, U256};
use serde::Deserialize;
use std::path::Path;
use tracing::debug;

/// Event emitted by the source bridge when a user deposits
pub const DEPOSIT_EVENT: &str = "Deposit";

/// Entry point on the destination bridge that releases a mirrored deposit
pub const RECEIVE_FUNCTION: &str = "receiveFromOtherChain";

#[derive(Deserialize)]
struct Artifact {
    abi: Abi,
}

/// Encode/decode oracle for the two bridge entry points the relayer uses
#[derive(Debug, Clone)]
pub struct BridgeAbi {
    deposit: Event,
    receive: Function,
}

impl BridgeAbi {
    /// Load the ABI from a build artifact on disk
    pub fn load(path: &Path) -> RelayerResult<Self> {
        let json = std::fs::read_to_string(path).map_err(|e| {
            RelayerError::Config(format!("Failed to read ABI artifact {:?}: {}", path, e))
        })?;
        let bridge = Self::from_artifact_json(&json)?;
        debug!("Loaded bridge ABI from {:?}", path);
        Ok(bridge)
    }

    /// Parse an artifact JSON object carrying an `abi` array
    pub fn from_artifact_json(json: &str) -> RelayerResult<Self> {
        let artifact: Artifact = serde_json::from_str(json)
            .map_err(|e| RelayerError::Abi(format!("Invalid artifact: {}", e)))?;
        Self::new(&artifact.abi)
    }

    /// Resolve both entry points and check their shape.
    ///
    /// `Deposit` must index `(address, uint, address)` and carry two
    /// non-indexed uints (amount, nonce), `receiveFromOtherChain` must take
    /// `(address, uint256, uint256)`.
    pub fn new(abi: &Abi) -> RelayerResult<Self> {
        let deposit = abi
            .event(DEPOSIT_EVENT)
            .map_err(|e| RelayerError::Abi(format!("{}: {}", DEPOSIT_EVENT, e)))?
            .clone();
        let receive = abi
            .function(RECEIVE_FUNCTION)
            .map_err(|e| RelayerError::Abi(format!("{}: {}", RECEIVE_FUNCTION, e)))?
            .clone();

        check_deposit(&deposit)?;
        check_receive(&receive)?;

        Ok(Self { deposit, receive })
    }

    /// Topic 0 of every deposit log
    pub fn deposit_signature(&self) -> H256 {
        self.deposit.signature()
    }

    /// Decode the non-indexed deposit data into `(amount, nonce)`
    pub fn decode_deposit_data(&self, data: &[u8]) -> RelayerResult<(U256, U256)> {
        let kinds: Vec<_> = self
            .deposit
            .inputs
            .iter()
            .filter(|param| !param.indexed)
            .map(|param| param.kind.clone())
            .collect();

        let tokens = abi::decode(&kinds, data)
            .map_err(|e| RelayerError::MalformedEvent(format!("{} data: {}", DEPOSIT_EVENT, e)))?;

        match tokens.as_slice() {
            [Token::Uint(amount), Token::Uint(nonce)] => Ok((*amount, *nonce)),
            other => Err(RelayerError::MalformedEvent(format!(
                "{} data decoded to {:?}",
                DEPOSIT_EVENT, other
            ))),
        }
    }

    /// Calldata for `receiveFromOtherChain(recipient, amount, nonce)`
    pub fn encode_receive(
        &self,
        recipient: Address,
        amount: U256,
        nonce: U256,
    ) -> RelayerResult<Bytes> {
        self.receive
            .encode_input(&[
                Token::Address(recipient),
                Token::Uint(amount),
                Token::Uint(nonce),
            ])
            .map(Bytes::from)
            .map_err(|e| RelayerError::Abi(format!("{}: {}", RECEIVE_FUNCTION, e)))
    }
}

fn check_deposit(event: &Event) -> RelayerResult<()> {
    if event.anonymous {
        return Err(RelayerError::Abi(format!("{} must not be anonymous", DEPOSIT_EVENT)));
    }

    let (indexed, data): (Vec<_>, Vec<_>) = event.inputs.iter().partition(|p| p.indexed);

    let indexed_ok = matches!(
        indexed.iter().map(|p| &p.kind).collect::<Vec<_>>().as_slice(),
        [ParamType::Address, ParamType::Uint(_), ParamType::Address]
    );
    if !indexed_ok {
        return Err(RelayerError::Abi(format!(
            "{} must index (address from, uint toChainId, address to), found {}",
            DEPOSIT_EVENT,
            describe(indexed.iter().map(|p| &p.kind))
        )));
    }

    let data_ok = matches!(
        data.iter().map(|p| &p.kind).collect::<Vec<_>>().as_slice(),
        [ParamType::Uint(_), ParamType::Uint(_)]
    );
    if !data_ok {
        return Err(RelayerError::Abi(format!(
            "{} data must be (uint amount, uint nonce), found {}",
            DEPOSIT_EVENT,
            describe(data.iter().map(|p| &p.kind))
        )));
    }

    Ok(())
}

fn check_receive(function: &Function) -> RelayerResult<()> {
    let kinds: Vec<_> = function.inputs.iter().map(|p| &p.kind).collect();
    if !matches!(
        kinds.as_slice(),
        [ParamType::Address, ParamType::Uint(256), ParamType::Uint(256)]
    ) {
        return Err(RelayerError::Abi(format!(
            "{} must take (address, uint256, uint256), found {}",
            RECEIVE_FUNCTION,
            describe(kinds.into_iter())
        )));
    }
    Ok(())
}

fn describe<'a>(kinds: impl Iterator<Item = &'a ParamType>) -> String {
    let kinds: Vec<_> = kinds.map(|kind| kind.to_string()).collect();
    format!("({})", kinds.join(", "))
}
