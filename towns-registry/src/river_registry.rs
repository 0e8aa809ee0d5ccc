//! Adapter over the on-chain River registry contract.
//!
//! Read calls go straight to an Ethereum JSON-RPC endpoint as `eth_call`;
//! the allocating transaction is handed to an injected [`ChainWriter`], the
//! seam behind which the chain transaction layer (nonce, gas, signing)
//! lives.

use crate::registry::{NodeRecord, NodeStatus};
use async_trait::async_trait;
use ethabi::{Contract, Token};
use jsonrpsee::core::client::ClientT;
use jsonrpsee::http_client::{HttpClient, HttpClientBuilder};
use jsonrpsee::rpc_params;
use primitive_types::H256;
use towns_core::{Address, Context, Err, Result, RiverError, StreamId};

const RIVER_REGISTRY_ABI: &str = r#"[
  {
    "type": "function",
    "name": "getAllNodes",
    "inputs": [],
    "outputs": [
      {
        "name": "",
        "type": "tuple[]",
        "components": [
          { "name": "status", "type": "uint8" },
          { "name": "url", "type": "string" },
          { "name": "nodeAddress", "type": "address" },
          { "name": "operator", "type": "address" }
        ]
      }
    ],
    "stateMutability": "view"
  },
  {
    "type": "function",
    "name": "allocateStream",
    "inputs": [
      { "name": "streamId", "type": "bytes32" },
      { "name": "genesisMiniblockHash", "type": "bytes32" },
      { "name": "genesisMiniblock", "type": "bytes" }
    ],
    "outputs": [{ "name": "nodes", "type": "address[]" }],
    "stateMutability": "nonpayable"
  },
  {
    "type": "function",
    "name": "getAllConfiguration",
    "inputs": [],
    "outputs": [
      {
        "name": "",
        "type": "tuple[]",
        "components": [
          { "name": "key", "type": "string" },
          { "name": "value", "type": "uint64" }
        ]
      }
    ],
    "stateMutability": "view"
  }
]"#;

/// Revert reason the contract uses for a second allocation of the same id.
const ALREADY_EXISTS_REVERT: &str = "ALREADY_EXISTS";

/// Registry operations the creation path consumes.
#[async_trait]
pub trait RiverRegistry: Send + Sync {
    /// Runs the allocating transaction. Returns the committee node
    /// addresses in allocation order, or `AlreadyExists` when the id is
    /// taken.
    async fn allocate_stream(
        &self,
        ctx: &Context,
        stream_id: StreamId,
        genesis_miniblock_hash: H256,
        genesis_miniblock: Vec<u8>,
    ) -> Result<Vec<Address>>;

    /// Enumerates the registered node fleet.
    async fn get_all_nodes(&self, ctx: &Context) -> Result<Vec<NodeRecord>>;

    /// Reads the network-wide tunables as `(key, value)` pairs.
    async fn get_all_configuration(&self, ctx: &Context) -> Result<Vec<(String, u64)>>;
}

/// Submits contract transactions and returns their return data. Implemented
/// by the chain transaction layer; not part of this crate.
#[async_trait]
pub trait ChainWriter: Send + Sync {
    async fn submit(&self, ctx: &Context, to: Address, calldata: Vec<u8>) -> Result<Vec<u8>>;
}

/// JSON-RPC-backed view of the deployed registry contract.
pub struct RiverRegistryContract {
    client: HttpClient,
    contract: Contract,
    address: Address,
    writer: Option<std::sync::Arc<dyn ChainWriter>>,
}

impl RiverRegistryContract {
    /// Connects to an Ethereum JSON-RPC endpoint. A [`ChainWriter`] is only
    /// needed when the caller allocates streams; read-only users (the ping
    /// command) pass `None`.
    pub fn new(
        rpc_url: &str,
        address: Address,
        writer: Option<std::sync::Arc<dyn ChainWriter>>,
    ) -> Result<Self> {
        let client = HttpClientBuilder::default().build(rpc_url).map_err(|err| {
            RiverError::with_base(Err::BadConfig, "failed to construct chain RPC client", err)
                .tag("url", rpc_url)
                .func("river_registry_contract")
        })?;
        let contract = Contract::load(RIVER_REGISTRY_ABI.as_bytes()).map_err(|err| {
            RiverError::with_base(Err::Internal, "invalid registry abi", err)
                .func("river_registry_contract")
        })?;
        Ok(Self { client, contract, address, writer })
    }

    fn function(&self, name: &'static str) -> Result<&ethabi::Function> {
        self.contract.function(name).map_err(|err| {
            RiverError::with_base(Err::Internal, "missing abi function", err).tag("function", name)
        })
    }

    async fn eth_call(&self, ctx: &Context, calldata: Vec<u8>) -> Result<Vec<u8>> {
        let call = serde_json::json!({
            "to": format!("{:?}", self.address),
            "data": format!("0x{}", hex::encode(calldata)),
        });
        let request = self.client.request::<String, _>("eth_call", rpc_params![call, "latest"]);
        let raw = tokio::select! {
            result = request => result.map_err(map_rpc_error)?,
            () = ctx.done() => return Err(ctx.error()),
        };
        hex::decode(raw.trim_start_matches("0x")).map_err(|err| {
            RiverError::with_base(Err::Internal, "malformed eth_call response", err)
        })
    }
}

#[async_trait]
impl RiverRegistry for RiverRegistryContract {
    async fn allocate_stream(
        &self,
        ctx: &Context,
        stream_id: StreamId,
        genesis_miniblock_hash: H256,
        genesis_miniblock: Vec<u8>,
    ) -> Result<Vec<Address>> {
        let Some(writer) = &self.writer else {
            return Err(RiverError::new(Err::BadConfig, "registry is read-only, no chain writer")
                .func("allocate_stream"));
        };
        let function = self.function("allocateStream")?;
        let calldata = function
            .encode_input(&[
                Token::FixedBytes(stream_id.as_bytes().to_vec()),
                Token::FixedBytes(genesis_miniblock_hash.as_bytes().to_vec()),
                Token::Bytes(genesis_miniblock),
            ])
            .map_err(|err| {
                RiverError::with_base(Err::Internal, "failed to encode allocateStream", err)
                    .tag("streamId", stream_id)
            })?;

        let output = writer.submit(ctx, self.address, calldata).await.map_err(|err| {
            if err.message().contains(ALREADY_EXISTS_REVERT) {
                RiverError::with_base(Err::AlreadyExists, "stream already allocated", err)
                    .tag("streamId", stream_id)
            } else {
                err
            }
        })?;

        let tokens = function.decode_output(&output).map_err(|err| {
            RiverError::with_base(Err::Internal, "failed to decode allocateStream output", err)
                .tag("streamId", stream_id)
        })?;
        let Some(Token::Array(nodes)) = tokens.into_iter().next() else {
            return Err(RiverError::new(Err::Internal, "unexpected allocateStream output")
                .tag("streamId", stream_id));
        };
        nodes
            .into_iter()
            .map(|token| match token {
                Token::Address(address) => Ok(address),
                other => Err(RiverError::new(Err::Internal, "unexpected committee entry")
                    .tag("token", format_args!("{other:?}"))),
            })
            .collect()
    }

    async fn get_all_nodes(&self, ctx: &Context) -> Result<Vec<NodeRecord>> {
        let function = self.function("getAllNodes")?;
        let calldata = function.encode_input(&[]).map_err(|err| {
            RiverError::with_base(Err::Internal, "failed to encode getAllNodes", err)
        })?;
        let output = self.eth_call(ctx, calldata).await?;
        let tokens = function.decode_output(&output).map_err(|err| {
            RiverError::with_base(Err::Internal, "failed to decode getAllNodes output", err)
        })?;
        let Some(Token::Array(entries)) = tokens.into_iter().next() else {
            return Err(RiverError::new(Err::Internal, "unexpected getAllNodes output"));
        };
        entries.into_iter().map(decode_node_record).collect()
    }

    async fn get_all_configuration(&self, ctx: &Context) -> Result<Vec<(String, u64)>> {
        let function = self.function("getAllConfiguration")?;
        let calldata = function.encode_input(&[]).map_err(|err| {
            RiverError::with_base(Err::Internal, "failed to encode getAllConfiguration", err)
        })?;
        let output = self.eth_call(ctx, calldata).await?;
        let tokens = function.decode_output(&output).map_err(|err| {
            RiverError::with_base(Err::Internal, "failed to decode getAllConfiguration output", err)
        })?;
        let Some(Token::Array(entries)) = tokens.into_iter().next() else {
            return Err(RiverError::new(Err::Internal, "unexpected getAllConfiguration output"));
        };
        entries
            .into_iter()
            .map(|entry| {
                let Token::Tuple(fields) = entry else {
                    return Err(RiverError::new(Err::Internal, "unexpected configuration entry"));
                };
                match <[Token; 2]>::try_from(fields) {
                    Ok([Token::String(key), Token::Uint(value)]) => Ok((key, value.as_u64())),
                    _ => Err(RiverError::new(Err::Internal, "unexpected configuration entry")),
                }
            })
            .collect()
    }
}

fn decode_node_record(token: Token) -> Result<NodeRecord> {
    let Token::Tuple(fields) = token else {
        return Err(RiverError::new(Err::Internal, "unexpected node entry"));
    };
    match <[Token; 4]>::try_from(fields) {
        Ok(
            [Token::Uint(status), Token::String(url), Token::Address(address), Token::Address(operator)],
        ) => {
            let status = u8::try_from(status.as_u64())
                .ok()
                .and_then(NodeStatus::from_contract)
                .ok_or_else(|| {
                    RiverError::new(Err::Internal, "unknown node status").tag("status", status)
                })?;
            Ok(NodeRecord { address, url, status, operator })
        },
        _ => Err(RiverError::new(Err::Internal, "unexpected node entry")),
    }
}

fn map_rpc_error(err: jsonrpsee::core::Error) -> RiverError {
    use jsonrpsee::core::Error as RpcError;
    match err {
        RpcError::Call(call) => {
            let kind = if call.message().contains(ALREADY_EXISTS_REVERT) {
                Err::AlreadyExists
            } else {
                Err::Internal
            };
            RiverError::with_base(kind, "chain call reverted", RpcError::Call(call))
        },
        other => RiverError::with_base(Err::Unavailable, "chain endpoint unreachable", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use primitive_types::H160;

    #[test]
    fn abi_parses_and_encodes() {
        let contract = Contract::load(RIVER_REGISTRY_ABI.as_bytes()).unwrap();
        let allocate = contract.function("allocateStream").unwrap();
        let calldata = allocate
            .encode_input(&[
                Token::FixedBytes(vec![0x11; 32]),
                Token::FixedBytes(vec![0x22; 32]),
                Token::Bytes(vec![1, 2, 3]),
            ])
            .unwrap();
        // 4-byte selector plus two static words plus the dynamic bytes blob.
        assert_eq!(&calldata[36..68], &[0x22; 32]);

        let committee = [H160::repeat_byte(5), H160::repeat_byte(6)];
        let output = ethabi::encode(&[Token::Array(
            committee.iter().map(|a| Token::Address(*a)).collect(),
        )]);
        let tokens = allocate.decode_output(&output).unwrap();
        assert_eq!(
            tokens,
            vec![Token::Array(vec![
                Token::Address(committee[0]),
                Token::Address(committee[1])
            ])]
        );
    }

    #[test]
    fn node_record_decoding() {
        let token = Token::Tuple(vec![
            Token::Uint(2u8.into()),
            Token::String("https://node.towns.example".into()),
            Token::Address(H160::repeat_byte(1)),
            Token::Address(H160::repeat_byte(2)),
        ]);
        let record = decode_node_record(token).unwrap();
        assert_eq!(record.status, NodeStatus::Operational);
        assert_eq!(record.address, H160::repeat_byte(1));

        let bad = Token::Tuple(vec![Token::Uint(9u8.into())]);
        assert!(decode_node_record(bad).is_err());
    }
}
