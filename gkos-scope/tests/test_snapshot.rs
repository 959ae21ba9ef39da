use gkos_scope::domain::{CoreId, ExecutionStatus, ThreadAddr};
use gkos_scope::introspection::SchedulerTopology;
use gkos_scope::session::{Session, SessionConfig};
use gkos_scope::snapshot::{RecordingSink, Snapshot, UNDEFINED};
use gkos_scope::target::synthetic::SyntheticKernel;
use gkos_scope::target::MemoryImage;
use gkos_scope_common::KernelGeneration;

fn start(kernel: SyntheticKernel) -> (Session<MemoryImage>, RecordingSink) {
    let generation = kernel.layout().generation;
    let config = SessionConfig { generation, ..SessionConfig::default() };
    let mut sink = RecordingSink::new();
    let session = Session::init(kernel.into_image(), &config, &mut sink).expect("session starts");
    (session, sink)
}

fn snapshot(kernel: SyntheticKernel) -> (Snapshot, RecordingSink) {
    let (mut session, mut sink) = start(kernel);
    let snapshot = session.update(&mut sink);
    (snapshot, sink)
}

fn cell(sink: &RecordingSink, thread: ThreadAddr, title: &str) -> String {
    let row = sink.row_for(thread).expect("thread is listed");
    sink.cell(row, title).expect("column exists").to_string()
}

#[test]
fn test_every_queued_thread_listed_once() {
    for generation in KernelGeneration::ALL {
        let mut k = SyntheticKernel::for_generation(generation);
        let threads: Vec<ThreadAddr> =
            (0..5).map(|i| k.add_thread(&format!("t{i}"), None)).collect();
        // Level 1 stays empty
        k.enqueue(0, 0, threads[0]);
        k.enqueue(0, 2, threads[1]);
        k.enqueue(0, 2, threads[2]);
        k.enqueue(0, 3, threads[3]);
        k.enqueue(0, 4, threads[4]);

        let (snapshot, sink) = snapshot(k);
        assert_eq!(snapshot.rows.len(), 5, "{generation}");
        assert_eq!(sink.rows.len(), 5, "{generation}");
        for thread in &threads {
            assert_eq!(snapshot.rows.iter().filter(|r| r.thread == *thread).count(), 1);
        }
        assert_eq!(cell(&sink, threads[2], "Priority"), "2");
        assert_eq!(cell(&sink, threads[2], "Name"), "t2");
        assert_eq!(snapshot.stats.malformed_queues, 0);
    }
}

#[test]
fn test_empty_queues_give_empty_table() {
    for generation in KernelGeneration::ALL {
        let (snapshot, sink) = snapshot(SyntheticKernel::for_generation(generation));
        assert!(snapshot.rows.is_empty());
        assert!(sink.rows.is_empty());
        assert!(!sink.columns.is_empty());
    }
}

#[test]
fn test_status_precedence() {
    let mut k = SyntheticKernel::for_generation(KernelGeneration::GkV4);
    let running = k.add_thread("running", None);
    let running_flagged = k.add_thread("running_flagged", None);
    let deleted = k.add_thread("deleted", None);
    let blocked = k.add_thread("blocked", None);
    let ready = k.add_thread("ready", None);
    for t in [running, running_flagged, deleted, blocked, ready] {
        k.enqueue(0, 1, t);
    }
    k.set_current(CoreId(0), Some(running));
    k.set_current(CoreId(1), Some(running_flagged));
    k.set_blocking(running_flagged, true);
    k.set_deleted(running_flagged);
    k.set_deleted(deleted);
    k.set_blocking(deleted, true);
    k.set_blocking(blocked, true);

    let (snapshot, sink) = snapshot(k);
    let status = |t| snapshot.row(t).map(|r| r.status);
    assert_eq!(status(running), Some(ExecutionStatus::Executing(CoreId(0))));
    assert_eq!(status(running_flagged), Some(ExecutionStatus::Executing(CoreId(1))));
    assert_eq!(status(deleted), Some(ExecutionStatus::Deleted));
    assert_eq!(status(blocked), Some(ExecutionStatus::Blocking));
    assert_eq!(status(ready), Some(ExecutionStatus::Waiting));
    assert_eq!(cell(&sink, running_flagged, "Status"), "exec core 1");
}

#[test]
fn test_amp_current_thread_per_instance() {
    let mut k = SyntheticKernel::for_generation(KernelGeneration::GkV3);
    let m7 = k.add_thread("m7_main", None);
    let m4 = k.add_thread("m4_main", None);
    k.enqueue(0, 2, m7);
    k.enqueue(1, 2, m4);
    k.set_current(CoreId(0), Some(m7));
    k.set_current(CoreId(1), Some(m4));

    let (_, sink) = snapshot(k);
    assert_eq!(cell(&sink, m7, "Status"), "exec core 0");
    assert_eq!(cell(&sink, m4, "Status"), "exec core 1");
    assert_eq!(cell(&sink, m7, "Core"), "0");
    assert_eq!(cell(&sink, m4, "Core"), "1");
}

#[test]
fn test_core_column_only_for_amp() {
    let cases = [
        (KernelGeneration::Gk, SchedulerTopology::Unified, false),
        (KernelGeneration::GkV3, SchedulerTopology::Amp, true),
        (KernelGeneration::GkV4, SchedulerTopology::SmpShared, false),
        (KernelGeneration::GkV4, SchedulerTopology::Amp, true),
    ];
    for (generation, topology, has_core) in cases {
        let (session, sink) = start(SyntheticKernel::new(generation, topology, 2));
        assert_eq!(sink.columns.iter().any(|c| c == "Core"), has_core, "{generation} {topology}");
        assert_eq!(session.context().topology().kind, topology);
        assert_eq!(sink.columns.first().map(String::as_str), Some("ID"));
    }
}

#[test]
fn test_unreadable_name_keeps_siblings() {
    let mut k = SyntheticKernel::for_generation(KernelGeneration::Gk);
    let broken = k.add_thread("broken", None);
    let sibling = k.add_thread("sibling", None);
    k.enqueue(0, 3, broken);
    k.enqueue(0, 3, sibling);
    k.break_name(broken);

    let (snapshot, sink) = snapshot(k);
    assert_eq!(cell(&sink, broken, "Name"), UNDEFINED);
    assert_eq!(cell(&sink, sibling, "Name"), "sibling");
    assert_eq!(snapshot.stats.degraded_rows, 1);
    assert_eq!(snapshot.row(broken).and_then(|r| r.name.clone()), None);
}

#[test]
fn test_malformed_queue_drops_only_its_level() {
    let mut k = SyntheticKernel::for_generation(KernelGeneration::GkV3);
    let lost = k.add_thread("lost", None);
    let kept = k.add_thread("kept", None);
    let other = k.add_thread("other", None);
    k.enqueue(0, 2, lost);
    k.enqueue(0, 3, kept);
    k.enqueue(1, 2, other);
    k.set_raw_queue(0, 2, 0x2000_2000, 0x2000_1000);

    let (snapshot, sink) = snapshot(k);
    assert_eq!(snapshot.stats.malformed_queues, 1);
    assert!(sink.row_for(lost).is_none());
    assert!(sink.row_for(kept).is_some());
    assert!(sink.row_for(other).is_some());
}

#[test]
fn test_oversized_queue_is_malformed() {
    let mut k = SyntheticKernel::for_generation(KernelGeneration::GkV4);
    let t = k.add_thread("t", None);
    k.enqueue(0, 1, t);
    k.set_raw_queue(0, 3, 0x1000, 0x1000 + 8 * 100_000);

    let (snapshot, _) = snapshot(k);
    assert_eq!(snapshot.stats.malformed_queues, 1);
    assert_eq!(snapshot.rows.len(), 1);
}

#[test]
fn test_unreadable_slot_is_skipped() {
    let mut k = SyntheticKernel::for_generation(KernelGeneration::GkV4);
    let t = k.add_thread("t", None);
    k.enqueue(0, 1, t);
    // Two slots, the second one past any mapped memory
    k.set_raw_queue(0, 2, 0x7fff_fff8, 0x8000_0008);

    let (snapshot, _) = snapshot(k);
    assert_eq!(snapshot.stats.skipped_slots, 2);
    assert_eq!(snapshot.rows.len(), 1);
}

#[test]
fn test_gk_id_pc_and_process_columns() {
    let mut k = SyntheticKernel::for_generation(KernelGeneration::Gk);
    let kernel = k.add_process("kernel");
    let owned = k.add_thread("owned", Some(kernel));
    let orphan = k.add_thread("orphan", None);
    k.enqueue(0, 5, owned);
    k.enqueue(0, 5, orphan);
    let info = k.thread_info(owned).expect("thread was added");

    let (_, sink) = snapshot(k);
    assert_eq!(cell(&sink, owned, "ID"), format!("{:x}", owned.0 - 0x3800_0000));
    assert_eq!(cell(&sink, owned, "PC"), format!("{:x}", info.pc));
    assert_eq!(cell(&sink, owned, "Process"), "kernel");
    assert_eq!(cell(&sink, orphan, "Process"), UNDEFINED);
}

#[test]
fn test_stack_column_brackets_sp() {
    let mut k = SyntheticKernel::for_generation(KernelGeneration::GkV3);
    let t = k.add_thread("t", None);
    k.enqueue(0, 0, t);
    let info = k.thread_info(t).expect("thread was added");

    let (snapshot, sink) = snapshot(k);
    let sp = info.saved_sp + 32;
    let end = info.stack_base + info.stack_length;
    let expected = format!("{sp:x} ({:x}-{end:x})", info.stack_base);
    assert_eq!(cell(&sink, t, "Stack"), expected);
    assert_eq!(snapshot.row(t).and_then(|r| r.stack.contains_sp()), Some(true));
}

#[test]
fn test_fp_context_moves_stack_pointer() {
    let mut k = SyntheticKernel::for_generation(KernelGeneration::Gk);
    let plain = k.add_thread("plain", None);
    let fp = k.add_thread("fp", None);
    let padded = k.add_thread("padded", None);
    k.enqueue(0, 1, plain);
    k.enqueue(0, 1, fp);
    k.enqueue(0, 1, padded);
    k.set_fp_context(fp, true);
    k.set_fp_context(padded, true);
    k.set_stacked_status(padded, 0x0100_0200);
    let saved = |k: &SyntheticKernel, t| k.thread_info(t).map(|i| i.saved_sp).unwrap_or_default();
    let (plain_sp, fp_sp, padded_sp) = (saved(&k, plain), saved(&k, fp), saved(&k, padded));

    let (session, _) = start(k);
    assert_eq!(session.thread_registers(plain)[13], plain_sp + 32);
    assert_eq!(session.thread_registers(fp)[13], fp_sp + 32 + 72);
    assert_eq!(session.thread_registers(padded)[13], padded_sp + 32 + 72 + 4);
}

#[test]
fn test_aarch64_register_file() {
    let mut k = SyntheticKernel::for_generation(KernelGeneration::GkV4);
    let t = k.add_thread("t", None);
    k.enqueue(0, 0, t);
    let info = k.thread_info(t).expect("thread was added");

    let (session, _) = start(k);
    let regs = session.thread_registers(t);
    assert_eq!(regs.len(), 42);
    assert_eq!(regs[33], info.pc);
    assert_eq!(regs[32], info.saved_sp);
    assert_eq!(regs[41], 0x3c5);
    assert_ne!(regs[30], 0);
}

#[test]
fn test_unreadable_stack_gives_zero_registers() {
    let mut k = SyntheticKernel::for_generation(KernelGeneration::GkV3);
    let t = k.add_thread("t", None);
    k.enqueue(0, 0, t);
    k.set_saved_sp(t, 0x7000_0000);

    let (mut session, mut sink) = start(k);
    let regs = session.thread_registers(t);
    assert_eq!(regs.len(), 17);
    assert_eq!(regs[15], 0);
    assert_ne!(regs[4], 0);

    session.update(&mut sink);
    assert_eq!(cell(&sink, t, "PC"), "0");
}

#[test]
fn test_saved_sp_at_top_of_address_space_keeps_siblings() {
    for generation in KernelGeneration::ALL {
        let mut k = SyntheticKernel::for_generation(generation);
        let corrupt = k.add_thread("corrupt", None);
        let sibling = k.add_thread("sibling", None);
        k.enqueue(0, 1, corrupt);
        k.enqueue(0, 1, sibling);
        k.set_saved_sp(corrupt, 0xFFFF_FFFF_FFFF_FFF0);
        let info = k.thread_info(sibling).expect("thread was added");

        let (snapshot, sink) = snapshot(k);
        assert_eq!(snapshot.rows.len(), 2, "{generation}");
        assert_eq!(cell(&sink, corrupt, "PC"), "0");
        assert_eq!(cell(&sink, corrupt, "Name"), "corrupt");
        assert_eq!(cell(&sink, sibling, "PC"), format!("{:x}", info.pc));
    }
}
