//! # atem-net
//!
//! `Controller` をネイティブの tokio UDP ソケットで動かすトランスポート。
//!
//! 1 つのタスクが `Controller` を所有し、受信・周期 tick・コマンドチャンネルを
//! `tokio::select!` で多重化する。他のタスクは `ControllerHandle` 経由で操作する。
//!
//! ```no_run
//! # async fn demo() -> Result<(), atem_net::NetError> {
//! use atem_client::{ClientConfig, Controller};
//!
//! let controller = Controller::new(ClientConfig::default());
//! let (handle, _task) = atem_net::connect("192.168.10.240", controller).await?;
//! handle.upload_still(0, vec![0; 1024], 1024).await?;
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod handle;
pub mod reactor;
pub mod socket;

pub use error::NetError;
pub use handle::ControllerHandle;
pub use reactor::{connect, spawn};
pub use socket::SwitcherSocket;
