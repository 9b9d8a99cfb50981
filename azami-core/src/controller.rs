//! セッションコントローラ
//!
//! デバッガのトップレベル状態機械です。実行コンテキストごとの状態と
//! 中断スタックを所有し、イベントキューのドレイン、メインループ、
//! ステップ操作、ユーザー起因の中断、切断処理を調停します。
//! すべての出力は構造化されたNoticeとして積まれ、テキスト整形は
//! 行いません。

use std::collections::VecDeque;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{anyhow, bail};
use tracing::debug;

use azami_expr::{parse_expression, EvalContext, Evaluated, PropertyStore};
use azami_session::{
    ContextId, DebugEvent, DebuggeeSession, FaultInfo, Location, ModuleId, SessionError,
    SuspendReason, WatchKind,
};

use crate::breakpoint::{
    BreakCreation, BreakpointId, BreakpointRegistry, Condition, EnableMode, Propagation,
    ResolveOutcome,
};
use crate::catchpoint::{CatchRegistry, CatchpointId};
use crate::context_state::{ContextRegistry, PromptState};
use crate::display::{DisplayId, DisplayRegistry};
use crate::input::LineSource;
use crate::location::LocationSet;
use crate::notice::Notice;
use crate::parse::{parse_location_arg, ParsedLocation};
use crate::settings::Settings;
use crate::unit_cache::CodeUnitCache;
use crate::watch::{WatchOutcome, WatchRegistry};

/// ステップ操作の種類
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepKind {
    Into,
    Over,
    Out,
    Continue,
}

/// ブレークポイント作成の報告
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BreakReport {
    Created {
        id: BreakpointId,
        locations: LocationSet,
    },
    Extended {
        id: BreakpointId,
        location: Location,
    },
    Existing {
        id: BreakpointId,
    },
    /// 位置がまだ解決できず、未解決として保存した
    Unresolved {
        id: BreakpointId,
    },
    /// 候補が複数あり、ブレークポイント一覧は変更されない
    Ambiguous {
        candidates: Vec<ModuleId>,
    },
}

/// セッションコントローラ
pub struct SessionController {
    session: Option<Box<dyn DebuggeeSession>>,
    cache: CodeUnitCache,
    breakpoints: BreakpointRegistry,
    watches: WatchRegistry,
    catchpoints: CatchRegistry,
    displays: DisplayRegistry,
    props: PropertyStore,
    contexts: ContextRegistry,
    /// 中断中のコンテキスト（最後に中断したものが末尾）
    suspended_contexts: Vec<ContextId>,
    active: ContextId,
    settings: Settings,
    notices: VecDeque<Notice>,
    /// 選択中のスタックフレーム
    frame_depth: u32,
    /// 現在のリスティング位置のモジュール
    listing_module: Option<ModuleId>,
}

impl SessionController {
    pub fn new(session: Box<dyn DebuggeeSession>, settings: Settings) -> Self {
        let active = session.active_context();
        let mut contexts = ContextRegistry::new();
        for id in session.contexts() {
            contexts.state(id);
        }
        Self {
            session: Some(session),
            cache: CodeUnitCache::new(),
            breakpoints: BreakpointRegistry::new(),
            watches: WatchRegistry::new(),
            catchpoints: CatchRegistry::new(),
            displays: DisplayRegistry::new(),
            props: PropertyStore::new(),
            contexts,
            suspended_contexts: Vec::new(),
            active,
            settings,
            notices: VecDeque::new(),
            frame_depth: 0,
            listing_module: None,
        }
    }

    //
    // 状態の参照
    //

    pub fn is_connected(&self) -> bool {
        self.session
            .as_deref()
            .map(|s| s.is_connected())
            .unwrap_or(false)
    }

    pub fn active_context(&self) -> ContextId {
        self.active
    }

    /// 中断中のコンテキスト（最後に中断したものが末尾）
    pub fn suspended_contexts(&self) -> &[ContextId] {
        &self.suspended_contexts
    }

    pub fn breakpoints(&self) -> &BreakpointRegistry {
        &self.breakpoints
    }

    pub fn watches(&self) -> &WatchRegistry {
        &self.watches
    }

    pub fn catchpoints(&self) -> &CatchRegistry {
        &self.catchpoints
    }

    pub fn displays(&self) -> &DisplayRegistry {
        &self.displays
    }

    pub fn properties_mut(&mut self) -> &mut PropertyStore {
        &mut self.props
    }

    /// 積まれた通知を取り出す
    pub fn drain_notices(&mut self) -> Vec<Notice> {
        self.notices.drain(..).collect()
    }

    /// 選択中スタックフレームを変更する
    pub fn select_frame(&mut self, depth: u32) {
        self.frame_depth = depth;
    }

    /// リスティング位置のモジュールを変更する
    pub fn set_listing_module(&mut self, module: Option<ModuleId>) {
        self.listing_module = module;
    }

    /// キャッシュを1つのコードユニットに絞る（Noneで解除）
    pub fn set_unit_filter(&mut self, unit_name: Option<&str>) -> crate::Result<bool> {
        let session = self
            .session
            .as_deref()
            .ok_or_else(|| anyhow!("not connected to a debuggee"))?;
        Ok(self.cache.set_unit_filter(session, unit_name)?)
    }

    pub fn cache(&self) -> &CodeUnitCache {
        &self.cache
    }

    /// キャッシュを最新化して参照する
    pub fn refresh_cache(&mut self) -> crate::Result<&CodeUnitCache> {
        let session = self
            .session
            .as_deref()
            .ok_or_else(|| anyhow!("not connected to a debuggee"))?;
        self.cache.refresh(session)?;
        Ok(&self.cache)
    }

    //
    // ブレークポイント操作
    //

    /// 位置式からブレークポイントを作る
    pub fn create_breakpoint(&mut self, arg: &str, propagable: bool) -> crate::Result<BreakReport> {
        self.wait_until_halted(self.active)?;
        self.refresh_cache()?;

        let parsed = parse_location_arg(&self.cache, self.listing_module, arg)?;
        match parsed {
            ParsedLocation::Ambiguous { candidates } => {
                // 一覧は変更しない
                Ok(BreakReport::Ambiguous { candidates })
            }
            ParsedLocation::NoMatch => {
                let id = self
                    .breakpoints
                    .create_unresolved(arg, self.cache.is_filtered());
                Ok(BreakReport::Unresolved { id })
            }
            ParsedLocation::Resolved { module, line } => {
                let context = self
                    .context_of_module(module)?
                    .ok_or_else(|| anyhow!("module #{} is not in any code unit", module))?;
                let session = self
                    .session
                    .as_deref_mut()
                    .ok_or_else(|| anyhow!("not connected to a debuggee"))?;
                let created = self.breakpoints.create(
                    session,
                    &self.cache,
                    &self.settings,
                    module,
                    line,
                    context,
                    propagable,
                    arg,
                )?;
                Ok(match created {
                    BreakCreation::Created { id, locations } => {
                        BreakReport::Created { id, locations }
                    }
                    BreakCreation::Extended { id, location } => {
                        BreakReport::Extended { id, location }
                    }
                    BreakCreation::Existing { id } => BreakReport::Existing { id },
                    BreakCreation::NothingArmed => {
                        // アームできる場所がない。元テキストで保存して後で再試行する
                        let id = self
                            .breakpoints
                            .create_unresolved(arg, self.cache.is_filtered());
                        BreakReport::Unresolved { id }
                    }
                })
            }
        }
    }

    /// ブレークポイントを削除する
    pub fn delete_breakpoint(&mut self, id: BreakpointId) -> crate::Result<()> {
        let session = self
            .session
            .as_deref_mut()
            .ok_or_else(|| anyhow!("not connected to a debuggee"))?;
        self.breakpoints.remove(session, &self.settings, id)?;
        Ok(())
    }

    /// ブレークポイントを有効化する
    pub fn enable_breakpoint(&mut self, id: BreakpointId, mode: EnableMode) -> crate::Result<bool> {
        let session = self
            .session
            .as_deref_mut()
            .ok_or_else(|| anyhow!("not connected to a debuggee"))?;
        self.breakpoints.enable(session, &self.settings, id, mode)
    }

    /// ブレークポイントを無効化する
    pub fn disable_breakpoint(&mut self, id: BreakpointId) -> crate::Result<()> {
        let session = self
            .session
            .as_deref_mut()
            .ok_or_else(|| anyhow!("not connected to a debuggee"))?;
        self.breakpoints.disable(session, &self.settings, id)
    }

    /// 条件式を設定する（Noneで解除）
    pub fn set_breakpoint_condition(
        &mut self,
        id: BreakpointId,
        condition: Option<&str>,
    ) -> crate::Result<()> {
        let parsed = match condition {
            Some(text) => Some(Condition {
                expr: parse_expression(text)?,
                text: text.to_string(),
            }),
            None => None,
        };
        let bp = self
            .breakpoints
            .get_mut(id)
            .ok_or_else(|| anyhow!("breakpoint {} not found", id))?;
        bp.condition = parsed;
        Ok(())
    }

    /// silentフラグを設定する
    pub fn set_breakpoint_silent(&mut self, id: BreakpointId, silent: bool) -> crate::Result<()> {
        let bp = self
            .breakpoints
            .get_mut(id)
            .ok_or_else(|| anyhow!("breakpoint {} not found", id))?;
        bp.silent = silent;
        Ok(())
    }

    /// 解決パスを明示的に実行する
    pub fn resolve_breakpoints(&mut self) -> crate::Result<Vec<(BreakpointId, ResolveOutcome)>> {
        self.refresh_cache()?;
        let session = self
            .session
            .as_deref_mut()
            .ok_or_else(|| anyhow!("not connected to a debuggee"))?;
        let reports =
            self.breakpoints
                .resolve_pass(session, &self.cache, &self.settings, self.listing_module);
        for (id, outcome) in &reports {
            self.notices.push_back(Notice::BreakpointResolution {
                id: *id,
                outcome: outcome.clone(),
            });
        }
        Ok(reports)
    }

    /// 伝播パスを明示的に実行する
    pub fn propagate_breakpoints(
        &mut self,
        context: ContextId,
    ) -> crate::Result<Vec<Propagation>> {
        self.refresh_cache()?;
        let session = self
            .session
            .as_deref_mut()
            .ok_or_else(|| anyhow!("not connected to a debuggee"))?;
        let reports = self
            .breakpoints
            .propagate(session, &self.cache, &self.settings, context)?;
        for report in &reports {
            self.notices.push_back(match report {
                Propagation::Added { id, location } => Notice::BreakpointPropagated {
                    id: *id,
                    location: *location,
                },
                Propagation::Skipped { id } => Notice::BreakpointNotPropagated { id: *id },
            });
        }
        Ok(reports)
    }

    //
    // ウォッチ・キャッチ・表示式
    //

    /// 式が指すメンバに値レベルウォッチを設定する
    pub fn set_watch(&mut self, text: &str, kind: WatchKind) -> crate::Result<WatchOutcome> {
        let expr = parse_expression(text)?;
        let context = self.active;
        let package = self.current_package();

        let resolved = {
            let session = self
                .session
                .as_deref_mut()
                .ok_or_else(|| anyhow!("not connected to a debuggee"))?;
            let mut ec = EvalContext::new(session, context, self.frame_depth, package, &mut self.props);
            match ec.evaluate(&expr)? {
                Evaluated::Variable(v) => v,
                _ => bail!("expression '{}' does not name a watchable member", text),
            }
        };

        let session = self
            .session
            .as_deref_mut()
            .ok_or_else(|| anyhow!("not connected to a debuggee"))?;
        self.watches.set(session, context, &resolved, kind, text)
    }

    /// ウォッチポイントを解除する
    pub fn remove_watch(&mut self, id: crate::watch::WatchpointId) -> crate::Result<bool> {
        let session = self
            .session
            .as_deref_mut()
            .ok_or_else(|| anyhow!("not connected to a debuggee"))?;
        self.watches.remove(session, id)
    }

    /// キャッチポイントを追加する（Noneですべての例外）
    pub fn add_catchpoint(&mut self, type_name: Option<&str>) -> crate::Result<CatchpointId> {
        let context = self.active;
        let session = self
            .session
            .as_deref_mut()
            .ok_or_else(|| anyhow!("not connected to a debuggee"))?;
        self.catchpoints.add(session, context, type_name)
    }

    /// キャッチポイントを削除する
    pub fn remove_catchpoint(&mut self, id: CatchpointId) -> crate::Result<bool> {
        let context = self.active;
        let session = self
            .session
            .as_deref_mut()
            .ok_or_else(|| anyhow!("not connected to a debuggee"))?;
        self.catchpoints.remove(session, context, id)
    }

    /// 自動表示式を追加する
    pub fn add_display(&mut self, text: &str) -> crate::Result<DisplayId> {
        let expr = parse_expression(text)?;
        Ok(self.displays.add(expr, text, self.active))
    }

    pub fn remove_display(&mut self, id: DisplayId) -> bool {
        self.displays.remove(id)
    }

    pub fn set_display_enabled(&mut self, id: DisplayId, enabled: bool) -> bool {
        self.displays.set_enabled(id, enabled)
    }

    //
    // 式の評価
    //

    /// 式を評価する（printコマンド）
    ///
    /// 結果は `$N` 履歴にも積まれ、その履歴番号を返します。
    pub fn print_expression(&mut self, text: &str) -> crate::Result<(Evaluated, Option<usize>)> {
        let expr = parse_expression(text)?;
        let context = self.active;
        let package = self.current_package();
        let session = self
            .session
            .as_deref_mut()
            .ok_or_else(|| anyhow!("not connected to a debuggee"))?;
        let mut ec = EvalContext::new(session, context, self.frame_depth, package, &mut self.props);
        let value = ec.evaluate(&expr)?;
        let history = ec.record(&value);
        Ok((value, history))
    }

    /// 式へ代入する（setコマンド）
    pub fn assign_expression(&mut self, target: &str, value: &str) -> crate::Result<()> {
        let expr = parse_expression(target)?;
        let context = self.active;
        let package = self.current_package();
        let session = self
            .session
            .as_deref_mut()
            .ok_or_else(|| anyhow!("not connected to a debuggee"))?;
        let mut ec = EvalContext::new(session, context, self.frame_depth, package, &mut self.props);
        ec.assign(&expr, value)?;
        Ok(())
    }

    //
    // 中断・再開・ステップ
    //

    /// アクティブコンテキストの再開を予約する
    ///
    /// 実際の再開要求はメインループの次の周回で発行されます。
    pub fn request_resume(&mut self) -> crate::Result<()> {
        let context = self.active;
        self.wait_until_halted(context)?;
        self.contexts.state(context).resume_requested = true;
        Ok(())
    }

    /// アクティブコンテキストの中断を要求し、完了を待つ
    pub fn halt(&mut self) -> crate::Result<bool> {
        let context = self.active;
        {
            let session = self
                .session
                .as_deref_mut()
                .ok_or_else(|| anyhow!("not connected to a debuggee"))?;
            session.suspend(context)?;
        }

        let deadline = Instant::now() + self.settings.halt_timeout;
        loop {
            let suspended = self.require_session()?.is_suspended(context)?;
            if suspended {
                self.mark_suspended(context, SuspendReason::StopRequest);
                return Ok(true);
            }
            if Instant::now() >= deadline {
                return Ok(false);
            }
            self.process_events()?;
            thread::sleep(self.settings.poll_interval);
        }
    }

    /// ステップを実行する
    ///
    /// ステップ完了後、停止位置の条件付きブレークポイントが偽と評価された
    /// 場合は透過的にstep_continueを再発行します。呼び出し側から見ると
    /// 1回のステップに見えます。
    pub fn step(&mut self, kind: StepKind) -> crate::Result<()> {
        let context = self.active;
        self.wait_until_halted(context)?;

        let reason = self.require_session()?.suspend_reason(context)?;
        if reason == SuspendReason::CodeLoaded {
            bail!("cannot step while suspended for a code load");
        }

        self.step_with_timeout(kind, context)?;
        loop {
            self.report_stop(true)?;

            let resume = {
                let state = self.contexts.state(context);
                if state.resume_requested {
                    state.resume_requested = false;
                    state.step_resume = false;
                    true
                } else {
                    false
                }
            };
            if resume {
                // 条件が偽だった。ステップ状態を保ったまま続行する
                self.step_with_timeout(StepKind::Continue, context)?;
            } else {
                break;
            }
        }
        Ok(())
    }

    fn step_with_timeout(&mut self, kind: StepKind, context: ContextId) -> crate::Result<()> {
        let deadline = Instant::now() + self.settings.step_timeout;
        {
            let session = self
                .session
                .as_deref_mut()
                .ok_or_else(|| anyhow!("not connected to a debuggee"))?;
            match kind {
                StepKind::Into => session.step_into(context)?,
                StepKind::Over => session.step_over(context)?,
                StepKind::Out => session.step_out(context)?,
                StepKind::Continue => session.step_continue(context)?,
            }
        }

        loop {
            if self.require_session()?.is_suspended(context)? {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(SessionError::NoResponse(self.settings.step_timeout).into());
            }
            self.process_events()?;
            thread::sleep(Duration::from_millis(1));
        }
    }

    //
    // メインループとイベント処理
    //

    /// メインループを1回実行する
    ///
    /// 何も中断していない、または最後に中断したコンテキストに再開予約が
    /// ない場合はイベントをドレインして戻ります。ただしプロンプト未完の
    /// コンテキストがあれば、アクティブをそこへ切り替えて一度きりの
    /// プロンプトを先に積みます。再開予約がある間は、発行・待機・ドレインを
    /// 繰り返します。実行中に入力が届いたら `confirm` で確認してから
    /// アクティブコンテキストを中断します。接続喪失は報告して終了します。
    pub fn running_loop(
        &mut self,
        lines: &LineSource,
        confirm: &mut dyn FnMut(&str) -> bool,
    ) -> crate::Result<()> {
        if self.session.is_none() {
            return Ok(());
        }
        if !self.is_connected() {
            self.disconnect("connection lost");
            return Ok(());
        }

        if self.any_suspended()? && self.pending_resume_context().is_none() {
            self.process_events()?;
            if let Some(context) = self.pending_prompt_context() {
                self.initial_prompt(context)?;
            }
            return Ok(());
        }

        loop {
            if let Some(context) = self.pending_resume_context() {
                if let Err(e) = self.issue_resume(context) {
                    // 接続喪失は再試行せず、報告して終了する
                    if matches!(
                        e.downcast_ref::<SessionError>(),
                        Some(SessionError::NotConnected)
                    ) {
                        self.disconnect("connection lost");
                        return Ok(());
                    }
                    return Err(e);
                }
            }

            thread::sleep(self.settings.poll_interval);
            self.process_events()?;

            if !self.is_connected() {
                self.disconnect("connection lost");
                return Ok(());
            }

            if self.any_suspended()? {
                // 理由が届くまで少しだけ待つ
                if let Some(&target) = self.suspended_contexts.last() {
                    let mut tries = 3;
                    while tries > 0
                        && self.require_session()?.suspend_reason(target)?
                            == SuspendReason::Unknown
                    {
                        thread::sleep(self.settings.poll_interval);
                        self.process_events()?;
                        tries -= 1;
                    }
                }

                self.report_stop(false)?;

                let newest = match self.suspended_contexts.last() {
                    Some(&c) => c,
                    None => return Ok(()),
                };
                if !self.contexts.state(newest).resume_requested {
                    return Ok(());
                }
            } else if lines.try_line().is_some() {
                // 実行中の入力は中断したいという意思表示かもしれない
                if confirm("debuggee is running, halt it?") {
                    let context = self.active;
                    {
                        let session = self
                            .session
                            .as_deref_mut()
                            .ok_or_else(|| anyhow!("not connected to a debuggee"))?;
                        session.suspend(context)?;
                    }
                    self.contexts.state(context).halt_requested = true;

                    if !self.is_connected() {
                        self.disconnect("connection lost");
                        return Ok(());
                    }
                    if self.require_session()?.is_suspended(context)? {
                        self.mark_suspended(context, SuspendReason::StopRequest);
                    } else {
                        self.notices.push_back(Notice::HaltFailed { context });
                    }
                }
            }
        }
    }

    /// イベントキューをドレインする
    ///
    /// SuspendedまたはFaultで中断スタックを更新したらドレインを打ち切り、
    /// 残りは次のドレインへ持ち越します。
    pub fn process_events(&mut self) -> crate::Result<()> {
        loop {
            let event = match self.session.as_deref_mut() {
                Some(session) => match session.next_event() {
                    Some(event) => event,
                    None => break,
                },
                None => return Ok(()),
            };

            match event {
                DebugEvent::Trace { context, text } => {
                    self.notices.push_back(Notice::Trace { context, text });
                }
                DebugEvent::CodeLoaded { context, unit } => {
                    self.cache.set_dirty();
                    self.notices.push_back(Notice::CodeLoaded { context, unit });
                }
                DebugEvent::CodeUnloaded { context, unit } => {
                    self.notices
                        .push_back(Notice::CodeUnloaded { context, unit });
                }
                DebugEvent::ContextCreated { context } => {
                    self.contexts.state(context);
                    self.notices.push_back(Notice::ContextCreated { context });
                }
                DebugEvent::ContextExited { context } => {
                    self.suspended_contexts.retain(|c| *c != context);
                    self.contexts.remove(context);
                    self.notices.push_back(Notice::ContextExited { context });
                }
                DebugEvent::Suspended { context, reason } => {
                    self.mark_suspended(context, reason);
                    if reason == SuspendReason::CodeLoaded {
                        // 新しいコードにブレークポイントを設定する機会を作る
                        self.contexts.state(context).prompt_state = PromptState::NeverShown;
                    }
                    break;
                }
                DebugEvent::Fault { context, fault } => {
                    self.mark_suspended(context, SuspendReason::Fault);
                    self.handle_fault(context, fault);
                    break;
                }
            }
        }
        Ok(())
    }

    /// 切断処理
    ///
    /// ウォッチ・表示式・キャッチポイントを破棄し、ブレークポイントは
    /// 再適用に備えて未解決へ降格して保持します。コードユニットキャッシュと
    /// セッションハンドルは捨てます。
    pub fn disconnect(&mut self, reason: &str) {
        if let Some(mut session) = self.session.take() {
            for w in self.watches.iter() {
                let _ = session.clear_watch(w.context, w.handle);
            }
            session.disconnect();
        }
        self.watches.clear_local();
        self.displays.clear_local();
        self.catchpoints.clear_local();
        self.breakpoints.demote_for_disconnect();
        self.cache = CodeUnitCache::new();
        self.suspended_contexts.clear();
        self.contexts.clear();
        self.listing_module = None;
        self.notices.push_back(Notice::SessionEnded {
            reason: reason.to_string(),
        });
    }

    /// 新しいセッションを取り付ける（再接続）
    ///
    /// 保持していたブレークポイントは次の解決パスで再アームされます。
    pub fn attach(&mut self, session: Box<dyn DebuggeeSession>) {
        self.active = session.active_context();
        for id in session.contexts() {
            self.contexts.state(id);
        }
        self.session = Some(session);
    }

    //
    // 内部処理
    //

    fn require_session(&self) -> crate::Result<&dyn DebuggeeSession> {
        self.session
            .as_deref()
            .ok_or_else(|| anyhow!("not connected to a debuggee"))
    }

    fn context_of_module(&self, module: ModuleId) -> crate::Result<Option<ContextId>> {
        let units = self.require_session()?.code_units()?;
        Ok(units.iter().find(|u| u.contains(module)).map(|u| u.context))
    }

    fn current_package(&self) -> Option<String> {
        let module = self.listing_module?;
        self.cache
            .resolve(module)
            .ok()
            .map(|m| m.package.clone())
            .filter(|p| !p.is_empty())
    }

    fn mark_suspended(&mut self, context: ContextId, reason: SuspendReason) {
        self.suspended_contexts.retain(|c| *c != context);
        self.suspended_contexts.push(context);
        self.contexts.state(context).last_reason = reason;
    }

    fn any_suspended(&self) -> crate::Result<bool> {
        let session = match self.session.as_deref() {
            Some(s) => s,
            None => return Ok(false),
        };
        for &context in &self.suspended_contexts {
            if session.is_suspended(context)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn pending_resume_context(&self) -> Option<ContextId> {
        self.suspended_contexts
            .iter()
            .copied()
            .find(|c| self.contexts.get(*c).map(|s| s.resume_requested).unwrap_or(false))
    }

    fn pending_prompt_context(&self) -> Option<ContextId> {
        self.suspended_contexts.iter().copied().find(|c| {
            self.contexts
                .get(*c)
                .map(|s| s.prompt_state != PromptState::Done)
                .unwrap_or(false)
        })
    }

    /// 再開予約のあるコンテキストに再開要求を発行する
    fn issue_resume(&mut self, context: ContextId) -> crate::Result<()> {
        let step_resume = self.contexts.state(context).step_resume;
        let result = {
            let session = self
                .session
                .as_deref_mut()
                .ok_or_else(|| anyhow!("not connected to a debuggee"))?;
            if step_resume {
                session.step_continue(context)
            } else {
                session.resume(context)
            }
        };
        match result {
            Ok(()) => {}
            Err(SessionError::NotSuspended(_)) => {
                self.notices.push_back(Notice::AlreadyRunning { context });
            }
            Err(e) => return Err(e.into()),
        }

        let state = self.contexts.state(context);
        state.prompt_state = PromptState::Done;
        state.clear_pending();
        self.suspended_contexts.retain(|c| *c != context);
        Ok(())
    }

    /// プロンプト未完のコンテキストへアクティブを切り替え、一度きりの
    /// プロンプトを積む
    fn initial_prompt(&mut self, context: ContextId) -> crate::Result<()> {
        let switched = self.active != context;
        self.active = context;

        if switched {
            {
                let session = self
                    .session
                    .as_deref_mut()
                    .ok_or_else(|| anyhow!("not connected to a debuggee"))?;
                session.set_active_context(context)?;
            }
            self.propagate_breakpoints(context)?;
        }

        if self.contexts.state(context).prompt_state == PromptState::NeverShown {
            self.notices.push_back(Notice::PromptNewCode { context });
            self.contexts.state(context).prompt_state = PromptState::ShownOnce;
        }

        self.resolve_breakpoints()?;
        Ok(())
    }

    /// 停止を報告する
    ///
    /// 最後に中断したコンテキストへアクティブを切り替え、理由ごとの処理を
    /// 行います。コードロードによる中断では解決パスと伝播を先に実行し、
    /// ブレークポイントによる停止では条件評価とヒット処理を行います。
    fn report_stop(&mut self, post_step: bool) -> crate::Result<()> {
        let target = match self.suspended_contexts.last() {
            Some(&c) => c,
            None => self.active,
        };
        let switched = self.active != target;
        self.active = target;
        if let Some(session) = self.session.as_deref_mut() {
            let _ = session.set_active_context(target);
        }

        let reason = match self.session.as_deref() {
            Some(session) => session
                .suspend_reason(target)
                .unwrap_or(SuspendReason::Unknown),
            None => return Ok(()),
        };

        if reason == SuspendReason::CodeLoaded {
            return self.code_loaded_stop(target);
        }

        let location = self
            .session
            .as_deref()
            .and_then(|s| s.current_location(target).ok())
            .flatten();

        let silent = self.process_break(post_step, target, location)?;

        let resuming = self
            .contexts
            .get(target)
            .map(|s| s.resume_requested)
            .unwrap_or(false);
        if !resuming && !silent {
            let breakpoint = location.and_then(|l| self.enabled_breakpoint_at(&l));
            self.notices.push_back(Notice::Halted {
                context: target,
                location,
                reason,
                breakpoint,
                context_switched: switched,
            });
        }
        Ok(())
    }

    /// コードロードによる中断の処理
    fn code_loaded_stop(&mut self, target: ContextId) -> crate::Result<()> {
        self.cache.set_dirty();
        self.refresh_cache()?;
        self.process_events()?;

        self.propagate_breakpoints(target)?;
        self.resolve_breakpoints()?;

        // ユーザーが再開する前にブレークポイントを設定できるよう促す
        self.notices.push_back(Notice::PromptNewCode { context: target });
        self.contexts.state(target).prompt_state = PromptState::ShownOnce;
        Ok(())
    }

    /// 停止位置のブレークポイント処理
    ///
    /// 条件付きブレークポイントが偽と評価された場合は、停止を報告せず
    /// 透過的な再開を予約します。ヒットカウンタは条件が真のときだけ
    /// 増えます。
    fn process_break(
        &mut self,
        post_step: bool,
        context: ContextId,
        location: Option<Location>,
    ) -> crate::Result<bool> {
        let location = match location {
            Some(l) => l,
            None => return Ok(false),
        };

        let stopped_due_to_bp = self
            .require_session()?
            .suspend_reason(context)
            .unwrap_or(SuspendReason::Unknown)
            == SuspendReason::Breakpoint;

        let halt_requested = self.contexts.state(context).halt_requested;
        let package = self.current_package();
        let matching = self.breakpoints.matching_at(&location);

        let mut bp_hit = false;
        let mut silent = false;
        let mut marked_for_removal = Vec::new();

        for id in matching {
            let (enabled, condition, is_silent, auto_disable, auto_delete) = {
                let bp = match self.breakpoints.get(id) {
                    Some(bp) => bp,
                    None => continue,
                };
                (
                    bp.enabled,
                    bp.condition.clone(),
                    bp.silent,
                    bp.auto_disable,
                    bp.auto_delete,
                )
            };

            let mut should = enabled;
            // 中断要求は条件に関係なく停止する
            if should && !halt_requested {
                if let Some(condition) = condition {
                    should = self.eval_condition(context, &condition, package.clone());
                }
            }

            if should {
                bp_hit = true;
                self.breakpoints.record_hit(id);
                silent |= is_silent;

                if auto_disable {
                    let session = self
                        .session
                        .as_deref_mut()
                        .ok_or_else(|| anyhow!("not connected to a debuggee"))?;
                    self.breakpoints.disable(session, &self.settings, id)?;
                }
                if auto_delete {
                    marked_for_removal.push(id);
                }
            }
        }

        for id in marked_for_removal.into_iter().rev() {
            let session = self
                .session
                .as_deref_mut()
                .ok_or_else(|| anyhow!("not connected to a debuggee"))?;
            self.breakpoints.remove(session, &self.settings, id)?;
        }

        if stopped_due_to_bp && !bp_hit {
            // 条件が偽だった。ステップ情報を失わずに静かに再開する
            let state = self.contexts.state(context);
            state.resume_requested = true;
            state.step_resume = post_step;
            silent = true;
        } else if !self.contexts.state(context).resume_requested {
            self.process_display(context);
        }

        Ok(silent)
    }

    /// 条件式を評価する。評価に失敗した場合は停止する側に倒す
    fn eval_condition(
        &mut self,
        context: ContextId,
        condition: &Condition,
        package: Option<String>,
    ) -> bool {
        let session = match self.session.as_deref_mut() {
            Some(s) => s,
            None => return true,
        };
        let mut ec = EvalContext::new(session, context, self.frame_depth, package, &mut self.props);
        match ec.evaluate(&condition.expr) {
            Ok(value) => value.truthy(),
            Err(e) => {
                debug!("breakpoint condition '{}' failed to evaluate: {}", condition.text, e);
                true
            }
        }
    }

    /// 有効な表示式を評価して通知に積む
    fn process_display(&mut self, context: ContextId) {
        let displays = self.displays.enabled_for(context);
        if displays.is_empty() {
            return;
        }
        let package = self.current_package();

        for display in displays {
            let result = {
                let session = match self.session.as_deref_mut() {
                    Some(s) => s,
                    None => return,
                };
                let mut ec = EvalContext::new(
                    session,
                    context,
                    self.frame_depth,
                    package.clone(),
                    &mut self.props,
                );
                ec.evaluate(&display.expr)
            };
            match result {
                Ok(value) => self.notices.push_back(Notice::Display {
                    id: display.id,
                    text: display.text.clone(),
                    value: value.display_repr(),
                }),
                Err(e) => self.notices.push_back(Notice::DisplayFailed {
                    id: display.id,
                    text: display.text.clone(),
                    error: e.to_string(),
                }),
            }
        }
    }

    fn enabled_breakpoint_at(&self, location: &Location) -> Option<BreakpointId> {
        self.breakpoints
            .matching_at(location)
            .into_iter()
            .find(|id| self.breakpoints.get(*id).map(|b| b.enabled).unwrap_or(false))
    }

    /// フォルトの停止判定
    ///
    /// 捕捉されない例外は常に停止します。捕捉される例外はキャッチポイントが
    /// 一致したときだけ停止し、一致しなければ静かに再開を予約します。
    fn handle_fault(&mut self, context: ContextId, fault: FaultInfo) {
        let stop = if fault.is_exception && fault.will_be_caught {
            self.catchpoints.matches(&fault)
        } else {
            true
        };
        let print = stop || !fault.is_exception;

        if print {
            self.notices.push_back(Notice::Fault {
                context,
                fault,
            });
        }
        if !stop {
            self.contexts.state(context).resume_requested = true;
        }
    }

    /// コンテキストが中断するまで待つ
    fn wait_until_halted(&mut self, context: ContextId) -> crate::Result<()> {
        let deadline = Instant::now() + self.settings.halt_timeout;
        loop {
            if self.require_session()?.is_suspended(context)? {
                return Ok(());
            }
            if Instant::now() >= deadline {
                bail!("execution context {} did not halt in time", context);
            }
            self.process_events()?;
            thread::sleep(self.settings.poll_interval);
        }
    }
}
