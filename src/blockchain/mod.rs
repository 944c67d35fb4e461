pub mod block_listener;
pub mod head_stream;
pub mod matcher;
pub mod resolver;
pub mod rpc_client;
pub mod transfer_decoder;

pub use block_listener::{BlockListener, CycleOutcome, ListenerHandle, ListenerState};
pub use head_stream::{parse_head, HeadStream};
pub use matcher::{MatchSummary, TransactionMatcher};
pub use resolver::TransactionResolver;
pub use rpc_client::{EthLog, LogFilter, RpcBlock, RpcClient, RpcTransaction};
pub use transfer_decoder::{address_topic, decode_transfer_log, TRANSFER_EVENT_SIGNATURE};
