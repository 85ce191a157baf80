pub mod cli;
pub mod dns;
pub mod monitor;
pub mod network;
pub mod notify;
pub mod probes;
pub mod protocol;
pub mod scan;
pub mod utils;

pub use cli::*;
pub use dns::*;
pub use monitor::*;
pub use network::*;
pub use notify::*;
pub use probes::*;
pub use scan::*;
pub use utils::*;
