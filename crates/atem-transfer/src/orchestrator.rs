//! ストア単位のロック管理と転送キュー

use std::collections::{BTreeMap, VecDeque};

use atem_wire::{LockRequest, Message, TransferChunkRequest, TransferError};

use crate::transfer::{Transfer, TransferId, TransferRequest, TransferSummary};

/// オーケストレーターの反応（呼び出し側が実行する）
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// 通常のメッセージとして送る
    Send(Message),
    /// 1 メッセージ 1 パケットで送る
    SendSeparately(Vec<Message>),
    /// 転送が完了した
    Completed(TransferSummary),
    /// スイッチャーが転送エラーを返した
    Failed { summary: TransferSummary, code: u8 },
}

/// ストアのロック状態
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockState {
    Unlocked,
    /// LOCK 送信済み、LKOB 待ち
    Requested,
    Held,
}

#[derive(Debug)]
struct StoreState {
    lock: LockState,
    /// 先頭が実行中（または次に開始する）転送
    queue: VecDeque<Transfer>,
}

impl StoreState {
    fn new(lock: LockState) -> Self {
        StoreState {
            lock,
            queue: VecDeque::new(),
        }
    }
}

/// 転送オーケストレーター
///
/// ## 責任
/// - ストアごとのロック取得・解放の順序を守る
/// - スイッチャーの FTCD に応じてチャンクを切り出す
/// - 完了/失敗後に同じストアの次の転送を開始する
///
/// ## 不変条件
/// - ロックを保持していないストアの転送は開始しない
/// - ストアごとに実行中の転送は高々 1 つ（キューの先頭）
/// - ロック解放はキューが空になったときに 1 回だけ送る
#[derive(Debug)]
pub struct TransferOrchestrator {
    stores: BTreeMap<u16, StoreState>,
    next_id: TransferId,
    /// セッションが確立しているか
    online: bool,
}

impl TransferOrchestrator {
    pub fn new() -> Self {
        TransferOrchestrator {
            stores: BTreeMap::new(),
            next_id: 1,
            online: false,
        }
    }

    /// 転送をキューに積む
    ///
    /// オンラインでロック未取得ならロックを要求する。ロック保持中で
    /// 実行中の転送がなければすぐに開始する。
    pub fn enqueue(&mut self, request: TransferRequest) -> (TransferId, Vec<Action>) {
        let id = self.allocate_id();
        let store = request.store;
        let online = self.online;
        let state = self
            .stores
            .entry(store)
            .or_insert_with(|| StoreState::new(LockState::Unlocked));
        state.queue.push_back(Transfer::new(id, request));
        tracing::debug!(transfer = id, store, queued = state.queue.len(), "transfer queued");

        let mut actions = Vec::new();
        if online {
            match state.lock {
                LockState::Unlocked => {
                    state.lock = LockState::Requested;
                    actions.push(lock_message(store, true));
                }
                LockState::Held if state.queue.len() == 1 => {
                    actions.extend(start_front(state));
                }
                _ => {}
            }
        }
        (id, actions)
    }

    /// LKOB: ロック取得を記録し、待っている転送があれば開始する
    pub fn lock_obtained(&mut self, store: u16) -> Vec<Action> {
        let state = self
            .stores
            .entry(store)
            .or_insert_with(|| StoreState::new(LockState::Unlocked));
        state.lock = LockState::Held;
        tracing::debug!(store, queued = state.queue.len(), "store lock obtained");
        start_front(state).into_iter().collect()
    }

    /// LKST: ロック状態の変化
    ///
    /// 保持中のロックを失ったら実行中の転送を先頭に巻き戻し、ロックを取り直す。
    /// 要求中のロックが解放状態と通知された場合は警告だけ出して LKOB を待つ。
    pub fn lock_state_changed(&mut self, store: u16, locked: bool) -> Vec<Action> {
        if locked {
            return Vec::new();
        }
        let Some(state) = self.stores.get_mut(&store) else {
            return Vec::new();
        };

        match state.lock {
            LockState::Unlocked => Vec::new(),
            LockState::Requested => {
                tracing::warn!(
                    store,
                    queued = state.queue.len(),
                    "store reported unlocked while lock requested"
                );
                Vec::new()
            }
            LockState::Held => {
                tracing::warn!(store, queued = state.queue.len(), "store lock lost");
                if state.queue.is_empty() {
                    self.stores.remove(&store);
                    return Vec::new();
                }
                if let Some(front) = state.queue.front_mut() {
                    front.rewind();
                }
                if !self.online {
                    state.lock = LockState::Unlocked;
                    return Vec::new();
                }
                state.lock = LockState::Requested;
                vec![lock_message(store, true)]
            }
        }
    }

    /// FTCD: 要求された数のチャンクを切り出す
    pub fn chunks_requested(&mut self, request: &TransferChunkRequest) -> Vec<Action> {
        let Some(transfer) = self.active_mut(request.transfer_id) else {
            tracing::warn!(transfer = request.transfer_id, "chunk request for unknown transfer");
            return Vec::new();
        };

        if request.chunk_size == 0 || request.chunk_count == 0 {
            tracing::warn!(
                transfer = request.transfer_id,
                chunk_size = request.chunk_size,
                chunk_count = request.chunk_count,
                "ignoring empty chunk request"
            );
            return Vec::new();
        }

        let chunks = transfer.next_chunks(
            usize::from(request.chunk_size),
            usize::from(request.chunk_count),
        );
        tracing::trace!(
            transfer = request.transfer_id,
            chunks = chunks.len(),
            remaining = transfer.remaining(),
            "sending chunks"
        );
        if chunks.is_empty() {
            return Vec::new();
        }
        vec![Action::SendSeparately(chunks)]
    }

    /// FTDC: 転送を完了させ、次の転送を開始するかロックを解放する
    pub fn transfer_finished(&mut self, id: TransferId) -> Vec<Action> {
        let Some((store, transfer)) = self.take_active(id) else {
            tracing::warn!(transfer = id, "completion for unknown transfer");
            return Vec::new();
        };
        tracing::debug!(transfer = id, store, "transfer completed");

        let mut actions = vec![Action::Completed(transfer.summary())];
        actions.extend(self.advance(store));
        actions
    }

    /// FTDE: 転送を放棄し、完了と同様に次へ進む
    pub fn transfer_failed(&mut self, error: &TransferError) -> Vec<Action> {
        let Some((store, transfer)) = self.take_active(error.transfer_id) else {
            tracing::warn!(transfer = error.transfer_id, "error for unknown transfer");
            return Vec::new();
        };
        tracing::warn!(transfer = error.transfer_id, store, code = error.code, "transfer rejected");

        let mut actions = vec![Action::Failed {
            summary: transfer.summary(),
            code: error.code,
        }];
        actions.extend(self.advance(store));
        actions
    }

    /// セッション喪失: ロックをすべて忘れ、実行中の転送を先頭に巻き戻す
    ///
    /// 転送そのものはキューに残り、次のセッションで再開される。
    pub fn session_lost(&mut self) {
        self.online = false;
        self.stores.retain(|_, state| !state.queue.is_empty());
        for (store, state) in &mut self.stores {
            state.lock = LockState::Unlocked;
            if let Some(front) = state.queue.front_mut() {
                if front.is_started() {
                    tracing::debug!(transfer = front.id(), store, "rewinding interrupted transfer");
                }
                front.rewind();
            }
        }
    }

    /// セッション確立: 待っている転送のあるストアのロックを要求し直す
    pub fn session_established(&mut self) -> Vec<Action> {
        self.online = true;
        let mut actions = Vec::new();
        for (&store, state) in &mut self.stores {
            if !state.queue.is_empty() && state.lock == LockState::Unlocked {
                state.lock = LockState::Requested;
                actions.push(lock_message(store, true));
            }
        }
        actions
    }

    /// キューに残っている転送の総数
    pub fn pending(&self) -> usize {
        self.stores.values().map(|s| s.queue.len()).sum()
    }

    pub fn is_idle(&self) -> bool {
        self.pending() == 0
    }

    pub fn lock_state(&self, store: u16) -> LockState {
        self.stores
            .get(&store)
            .map_or(LockState::Unlocked, |s| s.lock)
    }

    // ===== Private メソッド =====

    /// キューに残っている転送と重ならない ID を払い出す
    fn allocate_id(&mut self) -> TransferId {
        let mut id = self.next_id;
        for _ in 0..=u16::MAX {
            id = self.next_id;
            self.next_id = self.next_id.wrapping_add(1);
            if !self.is_queued(id) {
                break;
            }
        }
        id
    }

    fn is_queued(&self, id: TransferId) -> bool {
        self.stores
            .values()
            .any(|s| s.queue.iter().any(|t| t.id() == id))
    }

    /// 実行中（開始済みのキュー先頭）の転送
    fn active_mut(&mut self, id: TransferId) -> Option<&mut Transfer> {
        self.stores
            .values_mut()
            .filter_map(|s| s.queue.front_mut())
            .find(|t| t.id() == id && t.is_started())
    }

    fn take_active(&mut self, id: TransferId) -> Option<(u16, Transfer)> {
        let store = self.stores.iter().find_map(|(&store, s)| {
            s.queue
                .front()
                .filter(|t| t.id() == id && t.is_started())
                .map(|_| store)
        })?;
        let transfer = self.stores.get_mut(&store)?.queue.pop_front()?;
        Some((store, transfer))
    }

    /// 先頭の転送が終わった後の処理
    fn advance(&mut self, store: u16) -> Vec<Action> {
        let Some(state) = self.stores.get_mut(&store) else {
            return Vec::new();
        };

        if !state.queue.is_empty() {
            return start_front(state).into_iter().collect();
        }

        self.stores.remove(&store);
        tracing::debug!(store, "releasing store lock");
        vec![lock_message(store, false)]
    }
}

impl Default for TransferOrchestrator {
    fn default() -> Self {
        Self::new()
    }
}

fn lock_message(store: u16, lock: bool) -> Action {
    Action::Send(LockRequest { store, lock }.into())
}

/// ロック保持中なら、未開始のキュー先頭を開始する
fn start_front(state: &mut StoreState) -> Option<Action> {
    if state.lock != LockState::Held {
        return None;
    }
    let front = state.queue.front_mut().filter(|t| !t.is_started())?;
    tracing::debug!(transfer = front.id(), store = front.store(), "starting transfer");
    Some(Action::Send(front.start()))
}
