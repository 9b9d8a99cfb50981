//! Azami デバッギセッションインターフェース
//!
//! このクレートは、リモートで動作するデバッグ対象（デバッギ）との境界を提供します。
//! 実行コンテキストの中断/再開、ブレークポイントのアーム、コードユニットの列挙、
//! イベントキュー、オブジェクトグラフの参照などを抽象化します。
//! ワイヤトランスポート自体はこのクレートの範囲外です。

pub mod error;
pub mod event;
pub mod loopback;
pub mod session;
pub mod unit;
pub mod value;

pub use error::SessionError;
pub use event::{DebugEvent, FaultInfo, SuspendReason};
pub use loopback::{LoopbackSession, SharedSession};
pub use session::{DebuggeeSession, WatchHandle, WatchKind};
pub use unit::{CodeUnit, ContextId, Location, Module, ModuleId};
pub use value::{
    frame_base, RemoteValue, RemoteVariable, ValueId, BASE_ID, GLOBAL_ID, ROOT_ID, UNKNOWN_ID,
};

/// セッション操作の結果型
pub type Result<T> = std::result::Result<T, SessionError>;
