//! IPC HTTP 핸들러: 라이프사이클 코디네이터 위의 얇은 계층
//!
//! 하드 실패는 `LifecycleError`의 상태 코드로, 소프트 성공은
//! 200 + `"enabled": false` + `"warning"`으로 응답한다.

pub mod connector;
pub mod definition;
pub mod extension;
pub mod instance;
