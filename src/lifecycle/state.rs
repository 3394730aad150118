use serde::Serialize;
use thiserror::Error;

/// 인스턴스 라이프사이클 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceState {
    Absent,
    Validating,
    Resolving,
    Initializing,
    Running,
    ShuttingDown,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransitionError {
    #[error("invalid transition: {0:?} -> {1:?}")]
    InvalidTransition(InstanceState, InstanceState),
}

impl InstanceState {
    pub fn can_transition(&self, to: &InstanceState) -> bool {
        use InstanceState::*;
        matches!(
            (self, to),
            (Absent, Validating)
                | (Validating, Resolving)
                | (Resolving, Initializing)
                | (Initializing, Running)
                // 실패는 항상 Absent로 (인스턴스를 남겨두지 않음)
                | (Validating, Absent)
                | (Resolving, Absent)
                | (Initializing, Absent)
                | (Running, ShuttingDown)
                | (ShuttingDown, Absent)
                // 재시작: 종료 후 바로 다시 초기화
                | (ShuttingDown, Initializing)
        )
    }
}

/// 작업 하나가 거치는 상태를 추적한다. 전이는 debug 로그로 남긴다.
#[derive(Debug)]
pub struct StateMachine {
    id: String,
    pub state: InstanceState,
}

impl StateMachine {
    pub fn new(id: &str) -> Self {
        Self::starting_at(id, InstanceState::Absent)
    }

    pub fn starting_at(id: &str, state: InstanceState) -> Self {
        Self {
            id: id.to_string(),
            state,
        }
    }

    pub fn transition(&mut self, to: InstanceState) -> Result<(), TransitionError> {
        if self.state.can_transition(&to) {
            tracing::debug!("[{}] state transition: {:?} -> {:?}", self.id, self.state, to);
            self.state = to;
            Ok(())
        } else {
            Err(TransitionError::InvalidTransition(self.state, to))
        }
    }

    /// 실패 경로. 어느 상태에서든 Absent로 되돌린다.
    pub fn fail(&mut self) {
        if self.state != InstanceState::Absent {
            tracing::debug!("[{}] state transition: {:?} -> Absent (failed)", self.id, self.state);
            self.state = InstanceState::Absent;
        }
    }
}
