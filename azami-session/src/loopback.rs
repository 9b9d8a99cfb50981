//! ループバックセッション
//!
//! プロセス内で完結するスクリプト可能なデバッギ実装です。テストとCLIの
//! デモモードがデバッギ役として使います。コードユニットのロード、中断、
//! ステップ応答、オブジェクトグラフをすべてスクリプトから組み立てられます。

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};

use tracing::debug;

use crate::event::{DebugEvent, FaultInfo, SuspendReason};
use crate::session::{DebuggeeSession, WatchHandle, WatchKind};
use crate::unit::{CodeUnit, ContextId, Location, Module, ModuleId};
use crate::value::{RemoteValue, RemoteVariable, ValueId, UNKNOWN_ID};
use crate::{Result, SessionError};

/// ルート実行コンテキストのID
pub const ROOT_CONTEXT: ContextId = 1;

/// アーム要求の記録（テストが切り替えダンスを検証するために使う）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArmRequest {
    pub module: ModuleId,
    pub line: u32,
    /// 要求時点のアクティブコンテキスト
    pub active: ContextId,
    /// 要求時点でアクティブコンテキストが中断していたか
    pub active_suspended: bool,
}

#[derive(Debug)]
struct ContextSlot {
    suspended: bool,
    reason: SuspendReason,
    location: Option<Location>,
}

#[derive(Debug)]
struct ValueSlot {
    value: RemoteValue,
    /// 表示順を保つためVecで持つ
    members: Vec<(String, ValueId)>,
}

#[derive(Debug)]
struct WatchSlot {
    handle: WatchHandle,
    context: ContextId,
    value: ValueId,
    member: String,
    kind: WatchKind,
}

/// スクリプト可能なプロセス内デバッギ
pub struct LoopbackSession {
    connected: bool,
    active: ContextId,
    contexts: BTreeMap<ContextId, ContextSlot>,
    units: Vec<CodeUnit>,
    next_sequence: u64,
    armed: Vec<Location>,
    events: VecDeque<DebugEvent>,
    values: HashMap<ValueId, ValueSlot>,
    globals: HashMap<String, ValueId>,
    /// 予約ID（ルート、グローバル、フレームローカル）からの束縛
    roots: HashMap<(ContextId, ValueId), ValueId>,
    next_value_id: ValueId,
    watches: Vec<WatchSlot>,
    next_watch: WatchHandle,
    caught_enabled: HashSet<ContextId>,
    fault_on_assign: HashSet<(ValueId, String)>,
    non_executable: HashSet<(ModuleId, u32)>,
    step_stops: VecDeque<(Location, SuspendReason)>,
    on_resume: VecDeque<(Location, SuspendReason)>,
    /// ステップ要求に応答するか（falseでNoResponseのテストに使う）
    pub respond_to_steps: bool,
    /// アーム要求の記録
    pub arm_log: Vec<ArmRequest>,
    /// suspend要求の記録
    pub suspend_log: Vec<ContextId>,
    /// resume要求の記録
    pub resume_log: Vec<ContextId>,
}

impl LoopbackSession {
    /// ルートコンテキストだけを持つ接続済みセッションを作る
    pub fn new() -> Self {
        let mut contexts = BTreeMap::new();
        contexts.insert(
            ROOT_CONTEXT,
            ContextSlot {
                suspended: false,
                reason: SuspendReason::Unknown,
                location: None,
            },
        );
        Self {
            connected: true,
            active: ROOT_CONTEXT,
            contexts,
            units: Vec::new(),
            next_sequence: 1,
            armed: Vec::new(),
            events: VecDeque::new(),
            values: HashMap::new(),
            globals: HashMap::new(),
            roots: HashMap::new(),
            next_value_id: 1,
            watches: Vec::new(),
            next_watch: 1,
            caught_enabled: HashSet::new(),
            fault_on_assign: HashSet::new(),
            non_executable: HashSet::new(),
            step_stops: VecDeque::new(),
            on_resume: VecDeque::new(),
            respond_to_steps: true,
            arm_log: Vec::new(),
            suspend_log: Vec::new(),
            resume_log: Vec::new(),
        }
    }

    fn slot(&self, context: ContextId) -> Result<&ContextSlot> {
        self.contexts
            .get(&context)
            .ok_or(SessionError::UnknownContext(context))
    }

    fn slot_mut(&mut self, context: ContextId) -> Result<&mut ContextSlot> {
        self.contexts
            .get_mut(&context)
            .ok_or(SessionError::UnknownContext(context))
    }

    fn check_connected(&self) -> Result<()> {
        if self.connected {
            Ok(())
        } else {
            Err(SessionError::NotConnected)
        }
    }

    //
    // スクリプトAPI
    //

    /// 実行コンテキストを追加し、ContextCreatedイベントを積む
    pub fn add_context(&mut self, context: ContextId) {
        self.contexts.insert(
            context,
            ContextSlot {
                suspended: false,
                reason: SuspendReason::Unknown,
                location: None,
            },
        );
        self.events.push_back(DebugEvent::ContextCreated { context });
    }

    /// コードユニットをロードし、CodeLoadedイベントを積む
    ///
    /// ユニットには単調増加のロード順序番号が割り当てられます。
    pub fn load_unit(&mut self, context: ContextId, url: &str, modules: Vec<Module>) {
        self.load_unit_with(context, url, modules, true)
    }

    /// モジュールテーブルの報告が未完了のユニットをロードする
    pub fn load_unit_incomplete(&mut self, context: ContextId, url: &str, modules: Vec<Module>) {
        self.load_unit_with(context, url, modules, false)
    }

    fn load_unit_with(&mut self, context: ContextId, url: &str, modules: Vec<Module>, complete: bool) {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        self.units.push(CodeUnit {
            context,
            url: url.to_string(),
            complete,
            sequence,
            modules,
        });
        self.events.push_back(DebugEvent::CodeLoaded {
            context,
            unit: url.to_string(),
        });
    }

    /// ロード済みユニットのモジュールテーブルを完了にする
    pub fn complete_unit(&mut self, url: &str) {
        for unit in &mut self.units {
            if unit.url == url {
                unit.complete = true;
            }
        }
    }

    /// コンテキストを指定位置・指定理由で中断し、Suspendedイベントを積む
    pub fn suspend_at(&mut self, context: ContextId, location: Option<Location>, reason: SuspendReason) {
        if let Some(slot) = self.contexts.get_mut(&context) {
            slot.suspended = true;
            slot.reason = reason;
            slot.location = location;
        }
        self.events.push_back(DebugEvent::Suspended { context, reason });
    }

    /// フォルトを積む（コンテキストは中断状態になる）
    pub fn raise_fault(&mut self, context: ContextId, fault: FaultInfo) {
        if let Some(slot) = self.contexts.get_mut(&context) {
            slot.suspended = true;
            slot.reason = SuspendReason::Fault;
        }
        self.events.push_back(DebugEvent::Fault { context, fault });
    }

    /// トレース出力を積む
    pub fn emit_trace(&mut self, context: ContextId, text: &str) {
        self.events.push_back(DebugEvent::Trace {
            context,
            text: text.to_string(),
        });
    }

    /// (モジュール, 行) を実行可能コードなしとしてマークする
    pub fn mark_non_executable(&mut self, module: ModuleId, line: u32) {
        self.non_executable.insert((module, line));
    }

    /// 次のステップ完了時の停止位置を積む
    pub fn push_step_stop(&mut self, location: Location) {
        self.step_stops.push_back((location, SuspendReason::Step));
    }

    /// 次のステップでブレークポイント行に乗る（中断理由がBreakpointになる）
    pub fn push_step_stop_hitting_breakpoint(&mut self, location: Location) {
        self.step_stops.push_back((location, SuspendReason::Breakpoint));
    }

    /// 次のresumeの直後に指定位置・指定理由で再中断させる
    pub fn suspend_on_next_resume(&mut self, location: Location, reason: SuspendReason) {
        self.on_resume.push_back((location, reason));
    }

    /// オブジェクトグラフに値を定義し、IDを返す
    pub fn define_value(&mut self, type_name: &str, repr: &str) -> ValueId {
        let id = self.next_value_id;
        self.next_value_id += 1;
        self.values.insert(
            id,
            ValueSlot {
                value: RemoteValue {
                    id,
                    type_name: type_name.to_string(),
                    repr: repr.to_string(),
                    is_exception: false,
                },
                members: Vec::new(),
            },
        );
        id
    }

    /// 取得自体が例外になる値を定義する
    pub fn define_exception_value(&mut self, type_name: &str, repr: &str) -> ValueId {
        let id = self.define_value(type_name, repr);
        if let Some(slot) = self.values.get_mut(&id) {
            slot.value.is_exception = true;
        }
        id
    }

    /// 親値に名前付きメンバを追加する
    pub fn add_member(&mut self, parent: ValueId, name: &str, child: ValueId) {
        if let Some(slot) = self.values.get_mut(&parent) {
            slot.members.push((name.to_string(), child));
        }
    }

    /// 名前をスコープチェーン経由で解決できるようにする
    pub fn set_global(&mut self, name: &str, id: ValueId) {
        self.globals.insert(name.to_string(), id);
    }

    /// 予約ID（ROOT_ID、GLOBAL_ID、frame_base(d)）を実際の値に束縛する
    pub fn bind_root(&mut self, context: ContextId, reserved: ValueId, object: ValueId) {
        self.roots.insert((context, reserved), object);
    }

    /// (親, メンバ名) への代入がフォルトになるようにする
    pub fn fail_assignment(&mut self, parent: ValueId, member: &str) {
        self.fault_on_assign.insert((parent, member.to_string()));
    }

    /// アーム済みのLocation一覧
    pub fn armed_locations(&self) -> &[Location] {
        &self.armed
    }

    /// Locationがアーム済みか
    pub fn is_armed(&self, location: &Location) -> bool {
        self.armed.contains(location)
    }

    /// ウォッチの数
    pub fn watch_count(&self) -> usize {
        self.watches.len()
    }

    /// break-on-caughtが有効か
    pub fn is_caught_enabled(&self, context: ContextId) -> bool {
        self.caught_enabled.contains(&context)
    }

    fn resolve_id(&self, context: ContextId, id: ValueId) -> ValueId {
        if id < UNKNOWN_ID {
            // 予約IDは束縛テーブル経由で実体に変換する
            self.roots.get(&(context, id)).copied().unwrap_or(id)
        } else {
            id
        }
    }
}

impl Default for LoopbackSession {
    fn default() -> Self {
        Self::new()
    }
}

impl DebuggeeSession for LoopbackSession {
    fn is_connected(&self) -> bool {
        self.connected
    }

    fn contexts(&self) -> Vec<ContextId> {
        self.contexts.keys().copied().collect()
    }

    fn active_context(&self) -> ContextId {
        self.active
    }

    fn set_active_context(&mut self, context: ContextId) -> Result<()> {
        self.check_connected()?;
        self.slot(context)?;
        self.active = context;
        Ok(())
    }

    fn code_units(&self) -> Result<Vec<CodeUnit>> {
        self.check_connected()?;
        Ok(self.units.clone())
    }

    fn code_units_in(&self, context: ContextId) -> Result<Vec<CodeUnit>> {
        self.check_connected()?;
        Ok(self
            .units
            .iter()
            .filter(|u| u.context == context)
            .cloned()
            .collect())
    }

    fn is_suspended(&self, context: ContextId) -> Result<bool> {
        self.check_connected()?;
        Ok(self.slot(context)?.suspended)
    }

    fn suspend_reason(&self, context: ContextId) -> Result<SuspendReason> {
        self.check_connected()?;
        Ok(self.slot(context)?.reason)
    }

    fn suspend(&mut self, context: ContextId) -> Result<()> {
        self.check_connected()?;
        self.suspend_log.push(context);
        let slot = self.slot_mut(context)?;
        if !slot.suspended {
            slot.suspended = true;
            slot.reason = SuspendReason::StopRequest;
        }
        Ok(())
    }

    fn resume(&mut self, context: ContextId) -> Result<()> {
        self.check_connected()?;
        self.resume_log.push(context);
        let queued = self.on_resume.pop_front();
        let slot = self.slot_mut(context)?;
        if !slot.suspended {
            return Err(SessionError::NotSuspended(context));
        }
        slot.suspended = false;
        slot.reason = SuspendReason::Unknown;

        // スクリプトされた再中断（ブレークポイントヒット等の模擬）
        if let Some((location, reason)) = queued {
            slot.suspended = true;
            slot.reason = reason;
            slot.location = Some(location);
            self.events.push_back(DebugEvent::Suspended { context, reason });
        }
        Ok(())
    }

    fn step_into(&mut self, context: ContextId) -> Result<()> {
        self.step_any(context)
    }

    fn step_over(&mut self, context: ContextId) -> Result<()> {
        self.step_any(context)
    }

    fn step_out(&mut self, context: ContextId) -> Result<()> {
        self.step_any(context)
    }

    fn step_continue(&mut self, context: ContextId) -> Result<()> {
        self.step_any(context)
    }

    fn current_location(&self, context: ContextId) -> Result<Option<Location>> {
        self.check_connected()?;
        Ok(self.slot(context)?.location)
    }

    fn event_count(&self) -> usize {
        self.events.len()
    }

    fn next_event(&mut self) -> Option<DebugEvent> {
        self.events.pop_front()
    }

    fn arm(&mut self, module: ModuleId, line: u32) -> Result<Option<Location>> {
        self.check_connected()?;
        let active = self.active;
        let active_suspended = self.slot(active)?.suspended;
        self.arm_log.push(ArmRequest {
            module,
            line,
            active,
            active_suspended,
        });

        if !active_suspended {
            return Err(SessionError::NotSuspended(active));
        }

        let unit = self.units.iter().find(|u| u.contains(module));
        let unit = match unit {
            Some(u) if u.context == active => u,
            // アクティブコンテキストから見えないモジュールはアームできない
            _ => return Ok(None),
        };

        let in_range = unit
            .modules
            .iter()
            .find(|m| m.id == module)
            .map(|m| line >= 1 && line <= m.line_count)
            .unwrap_or(false);
        if !in_range || self.non_executable.contains(&(module, line)) {
            return Ok(None);
        }

        let location = Location::new(module, line, active);
        if !self.armed.contains(&location) {
            self.armed.push(location);
        }
        debug!("armed #{}:{} in context {}", module, line, active);
        Ok(Some(location))
    }

    fn disarm(&mut self, location: &Location) -> Result<()> {
        self.check_connected()?;
        self.armed.retain(|l| l != location);
        Ok(())
    }

    fn value(&mut self, context: ContextId, id: ValueId) -> Result<Option<RemoteValue>> {
        self.check_connected()?;
        let id = self.resolve_id(context, id);
        Ok(self.values.get(&id).map(|s| s.value.clone()))
    }

    fn member_named(
        &mut self,
        context: ContextId,
        parent: ValueId,
        name: &str,
    ) -> Result<Option<RemoteVariable>> {
        self.check_connected()?;
        let parent = self.resolve_id(context, parent);
        let slot = match self.values.get(&parent) {
            Some(s) => s,
            None => return Ok(None),
        };
        let child = slot.members.iter().find(|(n, _)| n == name).map(|(_, v)| *v);
        Ok(child.and_then(|id| {
            self.values
                .get(&id)
                .map(|s| RemoteVariable::new(name, s.value.clone()))
        }))
    }

    fn members(&mut self, context: ContextId, id: ValueId) -> Result<Vec<RemoteVariable>> {
        self.check_connected()?;
        let id = self.resolve_id(context, id);
        let slot = match self.values.get(&id) {
            Some(s) => s,
            None => return Ok(Vec::new()),
        };
        let mut out = Vec::new();
        for (name, child) in &slot.members {
            if let Some(v) = self.values.get(child) {
                out.push(RemoteVariable::new(name.clone(), v.value.clone()));
            }
        }
        Ok(out)
    }

    fn global(&mut self, context: ContextId, name: &str) -> Result<Option<RemoteValue>> {
        self.check_connected()?;
        let _ = context;
        Ok(self
            .globals
            .get(name)
            .and_then(|id| self.values.get(id))
            .map(|s| s.value.clone()))
    }

    fn set_member(
        &mut self,
        context: ContextId,
        parent: ValueId,
        name: &str,
        value: &str,
    ) -> Result<Option<FaultInfo>> {
        self.check_connected()?;
        let parent = self.resolve_id(context, parent);
        if self.fault_on_assign.contains(&(parent, name.to_string())) {
            return Ok(Some(FaultInfo::plain(
                "error",
                format!("assignment to '{}' threw", name),
            )));
        }

        let existing = self
            .values
            .get(&parent)
            .and_then(|s| s.members.iter().find(|(n, _)| n == name).map(|(_, v)| *v));
        match existing {
            Some(child) => {
                if let Some(slot) = self.values.get_mut(&child) {
                    slot.value.repr = value.to_string();
                }
            }
            None => {
                // 存在しないメンバへの代入は新しいプロパティを定義する
                let child = self.define_value("dynamic", value);
                self.add_member(parent, name, child);
            }
        }
        Ok(None)
    }

    fn set_watch(
        &mut self,
        context: ContextId,
        value: ValueId,
        member: &str,
        kind: WatchKind,
    ) -> Result<WatchHandle> {
        self.check_connected()?;
        let handle = self.next_watch;
        self.next_watch += 1;
        self.watches.push(WatchSlot {
            handle,
            context,
            value,
            member: member.to_string(),
            kind,
        });
        Ok(handle)
    }

    fn clear_watch(&mut self, context: ContextId, handle: WatchHandle) -> Result<()> {
        self.check_connected()?;
        let _ = context;
        self.watches.retain(|w| w.handle != handle);
        Ok(())
    }

    fn break_on_caught(&mut self, context: ContextId, enable: bool) -> Result<()> {
        self.check_connected()?;
        if enable {
            self.caught_enabled.insert(context);
        } else {
            self.caught_enabled.remove(&context);
        }
        Ok(())
    }

    fn disconnect(&mut self) {
        self.connected = false;
        self.events.clear();
    }
}

impl LoopbackSession {
    fn step_any(&mut self, context: ContextId) -> Result<()> {
        self.check_connected()?;
        let respond = self.respond_to_steps;
        let next_stop = if respond { self.step_stops.pop_front() } else { None };
        let slot = self.slot_mut(context)?;
        if !slot.suspended {
            return Err(SessionError::NotSuspended(context));
        }
        slot.suspended = false;
        slot.reason = SuspendReason::Unknown;

        if respond {
            let (location, reason) = match next_stop {
                Some((location, reason)) => (Some(location), reason),
                None => (slot.location, SuspendReason::Step),
            };
            slot.suspended = true;
            slot.reason = reason;
            slot.location = location;
            self.events.push_back(DebugEvent::Suspended { context, reason });
        }
        Ok(())
    }
}

/// 共有ハンドル付きループバックセッション
///
/// コントローラに所有権を渡した後もテスト側からスクリプト操作を続けられる
/// ように、内部状態を `Rc<RefCell>` で包んだハンドルです。
#[derive(Clone)]
pub struct SharedSession {
    inner: std::rc::Rc<std::cell::RefCell<LoopbackSession>>,
}

impl SharedSession {
    pub fn new(session: LoopbackSession) -> Self {
        Self {
            inner: std::rc::Rc::new(std::cell::RefCell::new(session)),
        }
    }

    /// スクリプト操作用の可変参照を取る
    pub fn script(&self) -> std::cell::RefMut<'_, LoopbackSession> {
        self.inner.borrow_mut()
    }
}

impl DebuggeeSession for SharedSession {
    fn is_connected(&self) -> bool {
        self.inner.borrow().is_connected()
    }

    fn contexts(&self) -> Vec<ContextId> {
        self.inner.borrow().contexts()
    }

    fn active_context(&self) -> ContextId {
        self.inner.borrow().active_context()
    }

    fn set_active_context(&mut self, context: ContextId) -> Result<()> {
        self.inner.borrow_mut().set_active_context(context)
    }

    fn code_units(&self) -> Result<Vec<CodeUnit>> {
        self.inner.borrow().code_units()
    }

    fn code_units_in(&self, context: ContextId) -> Result<Vec<CodeUnit>> {
        self.inner.borrow().code_units_in(context)
    }

    fn is_suspended(&self, context: ContextId) -> Result<bool> {
        self.inner.borrow().is_suspended(context)
    }

    fn suspend_reason(&self, context: ContextId) -> Result<SuspendReason> {
        self.inner.borrow().suspend_reason(context)
    }

    fn suspend(&mut self, context: ContextId) -> Result<()> {
        self.inner.borrow_mut().suspend(context)
    }

    fn resume(&mut self, context: ContextId) -> Result<()> {
        self.inner.borrow_mut().resume(context)
    }

    fn step_into(&mut self, context: ContextId) -> Result<()> {
        self.inner.borrow_mut().step_into(context)
    }

    fn step_over(&mut self, context: ContextId) -> Result<()> {
        self.inner.borrow_mut().step_over(context)
    }

    fn step_out(&mut self, context: ContextId) -> Result<()> {
        self.inner.borrow_mut().step_out(context)
    }

    fn step_continue(&mut self, context: ContextId) -> Result<()> {
        self.inner.borrow_mut().step_continue(context)
    }

    fn current_location(&self, context: ContextId) -> Result<Option<Location>> {
        self.inner.borrow().current_location(context)
    }

    fn event_count(&self) -> usize {
        self.inner.borrow().event_count()
    }

    fn next_event(&mut self) -> Option<DebugEvent> {
        self.inner.borrow_mut().next_event()
    }

    fn arm(&mut self, module: ModuleId, line: u32) -> Result<Option<Location>> {
        self.inner.borrow_mut().arm(module, line)
    }

    fn disarm(&mut self, location: &Location) -> Result<()> {
        self.inner.borrow_mut().disarm(location)
    }

    fn value(&mut self, context: ContextId, id: ValueId) -> Result<Option<RemoteValue>> {
        self.inner.borrow_mut().value(context, id)
    }

    fn member_named(
        &mut self,
        context: ContextId,
        parent: ValueId,
        name: &str,
    ) -> Result<Option<RemoteVariable>> {
        self.inner.borrow_mut().member_named(context, parent, name)
    }

    fn members(&mut self, context: ContextId, id: ValueId) -> Result<Vec<RemoteVariable>> {
        self.inner.borrow_mut().members(context, id)
    }

    fn global(&mut self, context: ContextId, name: &str) -> Result<Option<RemoteValue>> {
        self.inner.borrow_mut().global(context, name)
    }

    fn set_member(
        &mut self,
        context: ContextId,
        parent: ValueId,
        name: &str,
        value: &str,
    ) -> Result<Option<FaultInfo>> {
        self.inner.borrow_mut().set_member(context, parent, name, value)
    }

    fn set_watch(
        &mut self,
        context: ContextId,
        value: ValueId,
        member: &str,
        kind: WatchKind,
    ) -> Result<WatchHandle> {
        self.inner.borrow_mut().set_watch(context, value, member, kind)
    }

    fn clear_watch(&mut self, context: ContextId, handle: WatchHandle) -> Result<()> {
        self.inner.borrow_mut().clear_watch(context, handle)
    }

    fn break_on_caught(&mut self, context: ContextId, enable: bool) -> Result<()> {
        self.inner.borrow_mut().break_on_caught(context, enable)
    }

    fn disconnect(&mut self) {
        self.inner.borrow_mut().disconnect()
    }
}
