//! 状态监管：AgentState 的唯一持有者、阶段迁移通知、错误上报、取消令牌
//!
//! 锁只在同步代码中短暂持有，绝不跨 await；监听者在状态锁释放后同步回调。

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio_util::sync::CancellationToken;

use crate::core::error::{AgentError, ErrorContext, ErrorRecord};
use crate::core::state::{AgentPhase, AgentState, AgentStats, LoopLimits};

/// 阶段变更回调：(new_phase, old_phase)
pub type StateListener = Arc<dyn Fn(AgentPhase, AgentPhase) + Send + Sync>;
/// 错误回调
pub type ErrorHandler = Arc<dyn Fn(&ErrorRecord) + Send + Sync>;

/// add_* 返回的订阅 ID，用于 remove_*
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct AgentSupervisor {
    state: Mutex<AgentState>,
    listeners: Mutex<Vec<(SubscriptionId, StateListener)>>,
    error_handlers: Mutex<Vec<(SubscriptionId, ErrorHandler)>>,
    next_id: AtomicU64,
    /// 当前 run 的取消令牌；reset 时取消并替换
    cancel_token: Mutex<CancellationToken>,
    human_collaboration: AtomicBool,
}

impl AgentSupervisor {
    pub fn new(limits: LoopLimits) -> Self {
        Self {
            state: Mutex::new(AgentState::with_limits(limits)),
            listeners: Mutex::new(Vec::new()),
            error_handlers: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(0),
            cancel_token: Mutex::new(CancellationToken::new()),
            human_collaboration: AtomicBool::new(false),
        }
    }

    /// 在锁内读写状态；闭包内不得回调外部代码
    pub fn with_state<R>(&self, f: impl FnOnce(&mut AgentState) -> R) -> R {
        f(&mut lock(&self.state))
    }

    pub fn snapshot(&self) -> AgentState {
        lock(&self.state).clone()
    }

    pub fn stats(&self) -> AgentStats {
        lock(&self.state).stats()
    }

    pub fn phase(&self) -> AgentPhase {
        lock(&self.state).phase
    }

    pub fn is_running(&self) -> bool {
        lock(&self.state).is_running
    }

    /// 迁移到新阶段并同步通知所有监听者
    pub fn transition(&self, phase: AgentPhase) {
        let old = {
            let mut state = lock(&self.state);
            std::mem::replace(&mut state.phase, phase)
        };
        tracing::debug!(?old, new = ?phase, "phase transition");
        let listeners: Vec<StateListener> =
            lock(&self.listeners).iter().map(|(_, l)| l.clone()).collect();
        for listener in listeners {
            listener(phase, old);
        }
    }

    /// 记录错误并推送给 error handler，不改变阶段
    pub fn report_error(&self, err: &AgentError) -> ErrorRecord {
        let record = {
            let mut state = lock(&self.state);
            let record = ErrorRecord::new(
                err,
                ErrorContext {
                    phase: state.phase,
                    execution_count: state.execution_count,
                },
            );
            state.last_error = Some(record.clone());
            record
        };
        tracing::error!(kind = ?record.kind, message = %record.message, "agent error");
        let handlers: Vec<ErrorHandler> =
            lock(&self.error_handlers).iter().map(|(_, h)| h.clone()).collect();
        for handler in handlers {
            handler(&record);
        }
        record
    }

    /// 终止性错误：停止运行、迁移到 Error、通知 error handler
    pub fn fail(&self, err: &AgentError) -> ErrorRecord {
        let record = {
            let mut state = lock(&self.state);
            state.is_running = false;
            let record = ErrorRecord::new(
                err,
                ErrorContext {
                    phase: state.phase,
                    execution_count: state.execution_count,
                },
            );
            state.last_error = Some(record.clone());
            record
        };
        tracing::error!(kind = ?record.kind, message = %record.message, "agent error");
        self.transition(AgentPhase::Error);
        let handlers: Vec<ErrorHandler> =
            lock(&self.error_handlers).iter().map(|(_, h)| h.clone()).collect();
        for handler in handlers {
            handler(&record);
        }
        record
    }

    /// 停止循环并回到 Idle（LLM 传输失败时的「软失败」）
    pub fn halt_to_idle(&self) {
        self.with_state(|s| s.is_running = false);
        self.transition(AgentPhase::Idle);
    }

    /// stop / pause：只清除运行标志，正在进行的外部调用不会被打断
    ///
    /// 没有运行中的循环时什么也不做，返回 false；只有真正被打断的循环才会进入 Paused。
    pub fn pause(&self) -> bool {
        let was_running = self.with_state(|s| std::mem::replace(&mut s.is_running, false));
        if was_running {
            self.transition(AgentPhase::Paused);
        }
        was_running
    }

    fn next_subscription(&self) -> SubscriptionId {
        SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    pub fn add_state_listener(&self, listener: StateListener) -> SubscriptionId {
        let id = self.next_subscription();
        lock(&self.listeners).push((id, listener));
        id
    }

    pub fn remove_state_listener(&self, id: SubscriptionId) -> bool {
        let mut listeners = lock(&self.listeners);
        let before = listeners.len();
        listeners.retain(|(i, _)| *i != id);
        listeners.len() != before
    }

    pub fn add_error_handler(&self, handler: ErrorHandler) -> SubscriptionId {
        let id = self.next_subscription();
        lock(&self.error_handlers).push((id, handler));
        id
    }

    pub fn remove_error_handler(&self, id: SubscriptionId) -> bool {
        let mut handlers = lock(&self.error_handlers);
        let before = handlers.len();
        handlers.retain(|(i, _)| *i != id);
        handlers.len() != before
    }

    pub fn cancel_token(&self) -> CancellationToken {
        lock(&self.cancel_token).clone()
    }

    /// 取消当前令牌并换上新的（reset 时调用）
    pub fn renew_cancel_token(&self) -> CancellationToken {
        let mut token = lock(&self.cancel_token);
        token.cancel();
        *token = CancellationToken::new();
        token.clone()
    }

    pub fn human_collaboration(&self) -> bool {
        self.human_collaboration.load(Ordering::Relaxed)
    }

    pub fn set_human_collaboration(&self, enabled: bool) {
        self.human_collaboration.store(enabled, Ordering::Relaxed);
    }
}

impl Default for AgentSupervisor {
    fn default() -> Self {
        Self::new(LoopLimits::default())
    }
}
