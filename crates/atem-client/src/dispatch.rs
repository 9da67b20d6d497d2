//! 型付きディスパッチレジストリ
//!
//! `when::<C>(handler)` で登録したハンドラが、種類 `C::KIND` の受信メッセージ
//! ごとに登録順で呼ばれる。ハンドラはコントローラーへの参照を持たず、
//! `DispatchContext` 経由で返信を積む。

use std::collections::HashMap;

use atem_wire::{Command, Message, MessageKind};

/// ハンドラが返すエラー
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

pub type HandlerResult = Result<(), HandlerError>;

type Handler = Box<dyn FnMut(&Message, &mut DispatchContext) -> HandlerResult + Send>;

/// ハンドラに渡されるコンテキスト
#[derive(Debug, Default)]
pub struct DispatchContext {
    outgoing: Vec<Message>,
}

impl DispatchContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// 返信を積む（ディスパッチ後にコントローラーが送信キューへ移す）
    pub fn send(&mut self, message: impl Into<Message>) {
        self.outgoing.push(message.into());
    }

    /// 積まれた返信を取り出す
    pub fn take_outgoing(&mut self) -> Vec<Message> {
        std::mem::take(&mut self.outgoing)
    }
}

/// メッセージ種別ごとのハンドラ一覧
#[derive(Default)]
pub struct Dispatcher {
    handlers: HashMap<MessageKind, Vec<Handler>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// `C` 型のメッセージを受信したときのハンドラを登録する
    pub fn when<C, F>(&mut self, mut handler: F)
    where
        C: Command,
        F: FnMut(&C, &mut DispatchContext) -> HandlerResult + Send + 'static,
    {
        self.handlers
            .entry(C::KIND)
            .or_default()
            .push(Box::new(move |message, ctx| match C::from_message(message) {
                Some(command) => handler(command, ctx),
                None => Ok(()),
            }));
    }

    /// メッセージを登録順に各ハンドラへ渡す
    ///
    /// 失敗したハンドラがあっても残りのハンドラは実行する。
    ///
    /// # 戻り値
    /// 失敗したハンドラのエラー（登録順）
    pub fn dispatch(&mut self, message: &Message, ctx: &mut DispatchContext) -> Vec<HandlerError> {
        let Some(handlers) = self.handlers.get_mut(&message.kind()) else {
            return Vec::new();
        };

        handlers
            .iter_mut()
            .filter_map(|handler| handler(message, ctx).err())
            .collect()
    }

    /// 登録済みハンドラ数
    pub fn handler_count(&self, kind: MessageKind) -> usize {
        self.handlers.get(&kind).map_or(0, Vec::len)
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut counts: Vec<(MessageKind, usize)> = self
            .handlers
            .iter()
            .map(|(kind, handlers)| (*kind, handlers.len()))
            .collect();
        counts.sort();
        f.debug_struct("Dispatcher").field("handlers", &counts).finish()
    }
}
