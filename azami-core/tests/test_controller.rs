//! セッションコントローラのテスト
//!
//! ループバックセッションをデバッギ役に、メインループ・ステップ・
//! 条件付きブレークポイント・切断の各シナリオを通します。

use azami_core::{
    reader_channel, BreakReport, BreakStatus, Notice, SessionController, Settings, StepKind,
};
use azami_session::loopback::{LoopbackSession, ROOT_CONTEXT};
use azami_session::{
    frame_base, DebuggeeSession, FaultInfo, Location, Module, ModuleId, SessionError,
    SharedSession, SuspendReason, WatchKind,
};

fn module(id: ModuleId, package: &str, name: &str, lines: u32) -> Module {
    Module {
        id,
        name: name.to_string(),
        package: package.to_string(),
        line_count: lines,
        raw_identity: format!("{package}.{name}#{id}"),
    }
}

fn setup() -> (SharedSession, SessionController) {
    let mut inner = LoopbackSession::new();
    inner.load_unit(
        ROOT_CONTEXT,
        "main.unit",
        vec![
            module(1, "app", "Main.ext", 200),
            module(7, "app.util", "Timer.ext", 120),
            module(8, "app.util", "Timeout.ext", 40),
        ],
    );
    let shared = SharedSession::new(inner);
    let controller = SessionController::new(Box::new(shared.clone()), Settings::fast());
    (shared, controller)
}

/// ルートコンテキストを中断してイベントを処理する
fn halt_root(shared: &SharedSession, controller: &mut SessionController) {
    shared.script().suspend_at(
        ROOT_CONTEXT,
        Some(Location::new(7, 1, ROOT_CONTEXT)),
        SuspendReason::StopRequest,
    );
    controller.process_events().unwrap();
}

fn created_id(report: BreakReport) -> usize {
    match report {
        BreakReport::Created { id, .. } => id,
        other => panic!("expected Created, got {other:?}"),
    }
}

#[test]
fn test_ambiguous_name_leaves_breakpoint_list_unchanged() {
    let (shared, mut controller) = setup();
    halt_root(&shared, &mut controller);

    match controller.create_breakpoint("Tim*:5", true).unwrap() {
        BreakReport::Ambiguous { candidates } => assert_eq!(candidates.len(), 2),
        other => panic!("expected Ambiguous, got {other:?}"),
    }
    assert_eq!(controller.breakpoints().len(), 0);
}

#[test]
fn test_unknown_name_is_stored_unresolved() {
    let (shared, mut controller) = setup();
    halt_root(&shared, &mut controller);

    let id = match controller.create_breakpoint("Future.ext:9", true).unwrap() {
        BreakReport::Unresolved { id } => id,
        other => panic!("expected Unresolved, got {other:?}"),
    };
    let bp = controller.breakpoints().get(id).unwrap();
    assert_eq!(bp.status(), BreakStatus::Unresolved);
    assert!(bp.locations().is_empty());
    assert_eq!(bp.source_text, "Future.ext:9");
}

#[test]
fn test_step_timeout_fails_no_response() {
    let (shared, mut controller) = setup();
    halt_root(&shared, &mut controller);
    shared.script().respond_to_steps = false;

    let before = controller.suspended_contexts().to_vec();
    let err = controller.step(StepKind::Into).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<SessionError>(),
        Some(SessionError::NoResponse(_))
    ));
    // 中断スタックは呼び出し前と変わらない
    assert_eq!(controller.suspended_contexts(), before.as_slice());
}

#[test]
fn test_conditional_breakpoint_continues_transparently_on_step() {
    let (shared, mut controller) = setup();
    halt_root(&shared, &mut controller);

    {
        let mut script = shared.script();
        let locals = script.define_value("locals", "locals");
        script.bind_root(ROOT_CONTEXT, frame_base(0), locals);
        let count = script.define_value("int", "0");
        script.add_member(locals, "count", count);
    }

    let id = created_id(controller.create_breakpoint("#7:43", true).unwrap());
    controller
        .set_breakpoint_condition(id, Some("count == 1"))
        .unwrap();

    {
        let mut script = shared.script();
        script.push_step_stop_hitting_breakpoint(Location::new(7, 43, ROOT_CONTEXT));
        script.push_step_stop(Location::new(7, 44, ROOT_CONTEXT));
    }

    // 条件が偽: ブレークポイント行に乗っても止まったことにならず、
    // 透過的にstep_continueが発行されて次の行で止まる
    controller.step(StepKind::Into).unwrap();
    let halts: Vec<_> = controller
        .drain_notices()
        .into_iter()
        .filter_map(|n| match n {
            Notice::Halted { location, .. } => Some(location),
            _ => None,
        })
        .collect();
    assert_eq!(halts, vec![Some(Location::new(7, 44, ROOT_CONTEXT))]);
    assert_eq!(controller.breakpoints().get(id).unwrap().hit_count, 0);

    // 条件が真: 停止が報告され、ヒットカウンタが進む
    controller
        .set_breakpoint_condition(id, Some("count == 0"))
        .unwrap();
    shared
        .script()
        .push_step_stop_hitting_breakpoint(Location::new(7, 43, ROOT_CONTEXT));

    controller.step(StepKind::Into).unwrap();
    let notices = controller.drain_notices();
    assert!(notices.iter().any(|n| matches!(
        n,
        Notice::Halted {
            location: Some(l),
            breakpoint: Some(b),
            ..
        } if *l == Location::new(7, 43, ROOT_CONTEXT) && *b == id
    )));
    assert_eq!(controller.breakpoints().get(id).unwrap().hit_count, 1);
}

#[test]
fn test_code_load_resolves_and_propagates_breakpoints() {
    let (shared, mut controller) = setup();
    halt_root(&shared, &mut controller);

    let id = created_id(controller.create_breakpoint("#7:42", true).unwrap());
    controller.request_resume().unwrap();

    // 再開した直後に、似たモジュール(19)を含む第二ユニットがロードされて
    // コードロード理由で中断する
    {
        let mut script = shared.script();
        script.load_unit(
            ROOT_CONTEXT,
            "second.unit",
            vec![module(19, "app.util", "Timer.ext", 120)],
        );
        script.suspend_on_next_resume(
            Location::new(19, 1, ROOT_CONTEXT),
            SuspendReason::CodeLoaded,
        );
    }

    let (_sink, source) = reader_channel();
    controller.running_loop(&source, &mut |_| false).unwrap();

    let bp = controller.breakpoints().get(id).unwrap();
    assert_eq!(bp.locations().len(), 2);
    assert!(bp.locations().covers_in(7, 42, ROOT_CONTEXT));
    assert!(bp.locations().covers_in(19, 42, ROOT_CONTEXT));

    let notices = controller.drain_notices();
    assert!(notices.iter().any(|n| matches!(
        n,
        Notice::BreakpointPropagated { id: got, location }
            if *got == id && *location == Location::new(19, 42, ROOT_CONTEXT)
    )));
    assert!(notices
        .iter()
        .any(|n| matches!(n, Notice::PromptNewCode { context } if *context == ROOT_CONTEXT)));
}

#[test]
fn test_resume_runs_until_breakpoint_hit() {
    let (shared, mut controller) = setup();
    halt_root(&shared, &mut controller);

    let id = created_id(controller.create_breakpoint("#7:42", true).unwrap());
    controller.request_resume().unwrap();
    shared.script().suspend_on_next_resume(
        Location::new(7, 42, ROOT_CONTEXT),
        SuspendReason::Breakpoint,
    );

    let (_sink, source) = reader_channel();
    controller.running_loop(&source, &mut |_| false).unwrap();

    assert_eq!(controller.breakpoints().get(id).unwrap().hit_count, 1);
    let notices = controller.drain_notices();
    assert!(notices.iter().any(|n| matches!(
        n,
        Notice::Halted {
            location: Some(l),
            reason: SuspendReason::Breakpoint,
            breakpoint: Some(b),
            ..
        } if *l == Location::new(7, 42, ROOT_CONTEXT) && *b == id
    )));
}

#[test]
fn test_running_loop_halt_needs_confirmation() {
    let (shared, mut controller) = setup();

    let (sink, source) = reader_channel();
    assert!(sink.send("anything".to_string()));

    let mut asked = false;
    let mut confirm = |_prompt: &str| {
        asked = true;
        true
    };
    controller.running_loop(&source, &mut confirm).unwrap();
    assert!(asked);

    assert!(shared.script().suspend_log.contains(&ROOT_CONTEXT));
    let notices = controller.drain_notices();
    assert!(notices.iter().any(|n| matches!(
        n,
        Notice::Halted {
            reason: SuspendReason::StopRequest,
            location: None,
            ..
        }
    )));
}

#[test]
fn test_caught_exception_stops_only_for_matching_catchpoint() {
    let (shared, mut controller) = setup();

    let caught = |type_name: &str| FaultInfo {
        name: "exception".to_string(),
        information: "boom".to_string(),
        is_exception: true,
        will_be_caught: true,
        type_name: Some(type_name.to_string()),
    };

    // 捕捉されない例外は常に停止・報告される
    shared.script().raise_fault(
        ROOT_CONTEXT,
        FaultInfo {
            will_be_caught: false,
            ..caught("AppError")
        },
    );
    controller.process_events().unwrap();
    assert!(controller
        .drain_notices()
        .iter()
        .any(|n| matches!(n, Notice::Fault { .. })));

    // キャッチポイントがなければ、捕捉される例外は報告されない
    shared.script().raise_fault(ROOT_CONTEXT, caught("AppError"));
    controller.process_events().unwrap();
    assert!(!controller
        .drain_notices()
        .iter()
        .any(|n| matches!(n, Notice::Fault { .. })));

    // 全例外のキャッチポイントを足すと一致して停止する
    controller.add_catchpoint(None).unwrap();
    shared.script().raise_fault(ROOT_CONTEXT, caught("AppError"));
    controller.process_events().unwrap();
    assert!(controller
        .drain_notices()
        .iter()
        .any(|n| matches!(n, Notice::Fault { .. })));
}

#[test]
fn test_disconnect_keeps_breakpoints_and_clears_session_state() {
    let (shared, mut controller) = setup();
    halt_root(&shared, &mut controller);

    {
        let mut script = shared.script();
        let locals = script.define_value("locals", "locals");
        script.bind_root(ROOT_CONTEXT, frame_base(0), locals);
        let counter = script.define_value("app.Counter", "Counter#1");
        script.add_member(locals, "counter", counter);
        let value = script.define_value("int", "5");
        script.add_member(counter, "value", value);
        let err_type = script.define_value("type", "AppError$");
        script.set_global("AppError", err_type);
    }

    let id = created_id(controller.create_breakpoint("#7:42", true).unwrap());
    controller.set_watch("counter.value", WatchKind::Write).unwrap();
    controller.add_display("counter.value").unwrap();
    controller.add_catchpoint(Some("AppError")).unwrap();

    assert_eq!(controller.watches().len(), 1);
    assert_eq!(controller.displays().len(), 1);
    assert_eq!(controller.catchpoints().len(), 1);

    // 接続喪失を観測すると、報告して終了する
    shared.script().disconnect();
    let (_sink, source) = reader_channel();
    controller.running_loop(&source, &mut |_| false).unwrap();

    assert!(!controller.is_connected());
    assert!(controller
        .drain_notices()
        .iter()
        .any(|n| matches!(n, Notice::SessionEnded { .. })));

    // ブレークポイントは未解決に降格して生き残る
    let bp = controller.breakpoints().get(id).unwrap();
    assert_eq!(bp.status(), BreakStatus::Unresolved);
    assert!(bp.locations().is_empty());

    // ウォッチ・表示式・キャッチポイントはセッションスコープなので消える
    assert!(controller.watches().is_empty());
    assert!(controller.displays().is_empty());
    assert!(controller.catchpoints().is_empty());
}

#[test]
fn test_halt_suspends_active_context() {
    let (shared, mut controller) = setup();

    assert!(controller.halt().unwrap());
    assert!(shared.script().is_suspended(ROOT_CONTEXT).unwrap());
    assert_eq!(controller.suspended_contexts(), &[ROOT_CONTEXT]);
}

#[test]
fn test_print_and_assign_against_live_graph() {
    let (shared, mut controller) = setup();
    halt_root(&shared, &mut controller);

    {
        let mut script = shared.script();
        let locals = script.define_value("locals", "locals");
        script.bind_root(ROOT_CONTEXT, frame_base(0), locals);
        let counter = script.define_value("app.Counter", "Counter#1");
        script.add_member(locals, "counter", counter);
        let value = script.define_value("int", "5");
        script.add_member(counter, "value", value);
    }

    let (value, history) = controller.print_expression("counter.value").unwrap();
    assert_eq!(value.display_repr(), "5");
    assert_eq!(history, Some(1));

    controller.assign_expression("counter.value", "9").unwrap();
    let (value, _) = controller.print_expression("counter.value").unwrap();
    assert_eq!(value.display_repr(), "9");

    // 履歴は $N で参照できる
    let (value, _) = controller.print_expression("$1").unwrap();
    assert_eq!(value.display_repr(), "5");
}
