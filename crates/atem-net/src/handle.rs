//! 他のタスクからコントローラーを操作するハンドル

use atem_client::{
    Command, Controller, ControllerStats, DispatchContext, HandlerResult, Message, TransferId,
};
use tokio::sync::{mpsc, oneshot};

use crate::error::NetError;

/// コントローラータスクへの要求
pub(crate) enum Request {
    Send(Message),
    SendSeparately(Vec<Message>),
    /// タスク上でコントローラーを直接操作する
    Run(Box<dyn FnOnce(&mut Controller) + Send>),
    Shutdown,
}

/// コントローラータスクのハンドル
///
/// クローンして複数のタスクから使える。すべての操作はコントローラータスク上で
/// 受信・tick と直列に実行される。
#[derive(Debug, Clone)]
pub struct ControllerHandle {
    requests: mpsc::Sender<Request>,
}

impl ControllerHandle {
    pub(crate) fn new(requests: mpsc::Sender<Request>) -> Self {
        ControllerHandle { requests }
    }

    /// メッセージを送信キューに積む（次の tick で送信される）
    pub async fn send(&self, message: impl Into<Message>) -> Result<(), NetError> {
        self.request(Request::Send(message.into())).await
    }

    pub async fn send_separately(&self, messages: Vec<Message>) -> Result<(), NetError> {
        self.request(Request::SendSeparately(messages)).await
    }

    pub async fn upload_still(
        &self,
        slot: u32,
        data: Vec<u8>,
        uncompressed_size: u32,
    ) -> Result<TransferId, NetError> {
        self.with(move |c| c.upload_still(slot, data, uncompressed_size))
            .await
    }

    pub async fn upload_label(
        &self,
        source: u16,
        image: Vec<u8>,
        long_name: Option<String>,
        short_name: Option<String>,
    ) -> Result<TransferId, NetError> {
        self.with(move |c| {
            c.upload_label(source, image, long_name.as_deref(), short_name.as_deref())
        })
        .await
    }

    /// `C` 型のメッセージのハンドラを登録する
    pub async fn when<C, F>(&self, handler: F) -> Result<(), NetError>
    where
        C: Command,
        F: FnMut(&C, &mut DispatchContext) -> HandlerResult + Send + 'static,
    {
        self.with(move |c| c.when::<C, F>(handler)).await
    }

    pub async fn stats(&self) -> Result<ControllerStats, NetError> {
        self.with(|c| c.stats()).await
    }

    pub async fn is_connected(&self) -> Result<bool, NetError> {
        self.with(|c| c.is_connected()).await
    }

    /// コントローラータスク上で `f` を実行し、その結果を返す
    pub async fn with<R, F>(&self, f: F) -> Result<R, NetError>
    where
        R: Send + 'static,
        F: FnOnce(&mut Controller) -> R + Send + 'static,
    {
        let (reply, result) = oneshot::channel();
        self.request(Request::Run(Box::new(move |c| {
            let _ = reply.send(f(c));
        })))
        .await?;
        result.await.map_err(|_| NetError::Closed)
    }

    /// コントローラータスクを停止する
    pub async fn shutdown(&self) -> Result<(), NetError> {
        self.request(Request::Shutdown).await
    }

    async fn request(&self, request: Request) -> Result<(), NetError> {
        self.requests
            .send(request)
            .await
            .map_err(|_| NetError::Closed)
    }
}
