//! 個々の転送とチャンク分割

use atem_wire::{Message, Packet, RawCommand, StartDataTransfer, TransferData};

use crate::{LABEL_STORE, STILL_STORE};

/// 転送 ID（FTSD で送り、スイッチャーが FTCD/FTDC/FTDE で返してくる）
pub type TransferId = u16;

/// 1 チャンクの最大データ長（FTDa を 1 パケットに収めるための上限）
pub const MAX_CHUNK_LEN: usize = Packet::MAX_PAYLOAD - RawCommand::HEADER_LEN - 4;

/// 転送モード
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransferMode {
    /// 静止画の書き込み
    WritePicture,
    /// 入力ラベル画像の書き込み
    WriteLabel,
}

impl TransferMode {
    /// FTSD に載せるモードコード
    pub fn code(self) -> u16 {
        match self {
            TransferMode::WritePicture => 0x0001,
            TransferMode::WriteLabel => 0x0201,
        }
    }
}

/// アップロード要求
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferRequest {
    pub store: u16,
    /// スロット番号（静止画）またはソース ID（ラベル）
    pub index: u32,
    pub data: Vec<u8>,
    /// 展開後のサイズ（スイッチャーに事前に知らせる）
    pub uncompressed_size: u32,
    pub mode: TransferMode,
}

impl TransferRequest {
    /// 静止画ストアの `slot` への書き込み
    pub fn still(slot: u32, data: Vec<u8>, uncompressed_size: u32) -> Self {
        TransferRequest {
            store: STILL_STORE,
            index: slot,
            data,
            uncompressed_size,
            mode: TransferMode::WritePicture,
        }
    }

    /// 入力 `source` のラベル画像の書き込み
    pub fn label(source: u16, image: Vec<u8>) -> Self {
        let size = u32::try_from(image.len()).unwrap_or(u32::MAX);
        TransferRequest {
            store: LABEL_STORE,
            index: u32::from(source),
            data: image,
            uncompressed_size: size,
            mode: TransferMode::WriteLabel,
        }
    }
}

/// 完了・失敗の通知に載せる転送の要約
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferSummary {
    pub id: TransferId,
    pub store: u16,
    pub index: u32,
    pub mode: TransferMode,
    /// ペイロードのバイト数
    pub len: usize,
}

/// キューに積まれた転送
#[derive(Debug, Clone)]
pub struct Transfer {
    id: TransferId,
    request: TransferRequest,
    /// 送信済みバイト数
    offset: usize,
    /// FTSD を送ったか
    started: bool,
}

impl Transfer {
    pub fn new(id: TransferId, request: TransferRequest) -> Self {
        Transfer {
            id,
            request,
            offset: 0,
            started: false,
        }
    }

    pub fn id(&self) -> TransferId {
        self.id
    }

    pub fn store(&self) -> u16 {
        self.request.store
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    /// 送信済みバイト数
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// 未送信のバイト数
    pub fn remaining(&self) -> usize {
        self.request.data.len() - self.offset
    }

    /// 転送開始メッセージを作り、開始済みにする
    pub fn start(&mut self) -> Message {
        self.started = true;
        StartDataTransfer {
            transfer_id: self.id,
            store: self.request.store,
            index: self.request.index,
            size: self.request.uncompressed_size,
            mode: self.request.mode.code(),
        }
        .into()
    }

    /// 次のチャンク列を切り出す
    ///
    /// 最大 `count` 個、それぞれ `chunk_size` 以下。ペイロードの終端を越えては送らない。
    pub fn next_chunks(&mut self, chunk_size: usize, count: usize) -> Vec<Message> {
        let chunk_size = chunk_size.min(MAX_CHUNK_LEN);
        if chunk_size == 0 {
            return Vec::new();
        }

        let mut chunks = Vec::new();
        while chunks.len() < count && self.remaining() > 0 {
            let end = (self.offset + chunk_size).min(self.request.data.len());
            chunks.push(
                TransferData {
                    transfer_id: self.id,
                    data: self.request.data[self.offset..end].to_vec(),
                }
                .into(),
            );
            self.offset = end;
        }
        chunks
    }

    /// セッション喪失後に先頭からやり直せるようにする
    pub fn rewind(&mut self) {
        self.offset = 0;
        self.started = false;
    }

    pub fn summary(&self) -> TransferSummary {
        TransferSummary {
            id: self.id,
            store: self.request.store,
            index: self.request.index,
            mode: self.request.mode,
            len: self.request.data.len(),
        }
    }
}
