pub mod cli;
pub mod http;

pub use cli::{Cli, CliError, CliHandler, Commands};
pub use http::{
    get_current_block, get_status, get_transactions, router, subscribe, ApiError, ApiResponse, ApiServer, AppState,
    SubscribeRequest, TransactionsQuery,
};
