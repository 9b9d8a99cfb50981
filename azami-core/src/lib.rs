//! Azami デバッガのコア機能
//!
//! このクレートは、デバッガの中核となるロジックを提供します。
//! ブレークポイントの解決と伝播、複数実行コンテキストの中断/再開、
//! コードユニットキャッシュ、ウォッチ/キャッチ/自動表示の管理を統合します。
//! テキスト整形は一切行わず、構造化された結果とNoticeストリームを返します。

pub mod breakpoint;
pub mod catchpoint;
pub mod context_state;
pub mod controller;
pub mod display;
pub mod input;
pub mod location;
pub mod notice;
pub mod parse;
pub mod settings;
pub mod unit_cache;
pub mod watch;

pub use breakpoint::{
    BreakCreation, Breakpoint, BreakpointId, BreakpointRegistry, BreakStatus, Condition,
    EnableMode, Propagation, ResolveOutcome,
};
pub use catchpoint::{CatchRegistry, Catchpoint, CatchpointId};
pub use context_state::{ContextRegistry, ContextState, PromptState};
pub use controller::{BreakReport, SessionController, StepKind};
pub use display::{DisplayExpression, DisplayId, DisplayRegistry};
pub use input::{reader_channel, spawn_reader, LineSink, LineSource};
pub use location::LocationSet;
pub use notice::Notice;
pub use parse::{parse_location_arg, ParsedLocation};
pub use settings::Settings;
pub use unit_cache::{CacheError, CodeUnitCache};
pub use watch::{WatchOutcome, WatchRegistry, Watchpoint, WatchpointId};

// 他のクレートから使うために再エクスポート
pub use azami_expr::{parse_expression, Evaluated, Expr, PropertyStore};
pub use azami_session::{
    CodeUnit, ContextId, DebugEvent, DebuggeeSession, Location, Module, ModuleId, SessionError,
    SuspendReason, WatchKind,
};

/// デバッガコアの結果型
pub type Result<T> = anyhow::Result<T>;
