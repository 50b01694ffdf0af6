//! Message contracts of the external collaborators (wallets, exchange gateway)

pub mod gateway;
pub mod wallet;

pub use gateway::{GatewayCommand, GatewayReply};
pub use wallet::{WalletCommand, WalletReply};
