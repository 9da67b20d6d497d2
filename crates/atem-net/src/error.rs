//! atem-net エラー型

use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum NetError {
    /// コントローラータスクが終了している
    #[error("controller task has stopped")]
    Closed,

    #[error("could not resolve switcher address {0}")]
    Resolve(String),

    #[error(transparent)]
    Io(#[from] io::Error),
}
