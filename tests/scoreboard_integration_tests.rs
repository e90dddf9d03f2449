use axi_slice_tb::bench::{Clock, ResetSequencer, Watchdog};
use axi_slice_tb::error::Observed;
use axi_slice_tb::sched::Kernel;
use axi_slice_tb::scoreboard::Scoreboard;
use axi_slice_tb::{
    run, run_behavioral, Bench, ByteOrder, ChannelId, FailureKind, Fault, PipelineStage, PortId,
    RegisterSlice, ScriptedStimulus, SimTime, Stimulus, TbConfig, TbError,
};

/// Runs a full bench and keeps it around for inspection afterwards
struct BenchHelper<'a> {
    config: &'a TbConfig,
    bench: Bench<'a>,
}

impl<'a> BenchHelper<'a> {
    fn new(config: &'a TbConfig) -> Self {
        Self::with_dut(config, RegisterSlice::new())
    }

    fn with_dut(config: &'a TbConfig, dut: impl PipelineStage + 'a) -> Self {
        Self {
            config,
            bench: Bench::new(config, Box::new(dut)),
        }
    }

    /// Clock, watchdog, reset and scoreboard, as the runner composes them
    fn run(&mut self, stimulus: impl Stimulus + 'a) -> Result<SimTime, TbError> {
        let mut kernel = Kernel::new();
        kernel.spawn_background(Clock::new(self.config));
        kernel.spawn_background(Watchdog::new(self.config));
        kernel.spawn(ResetSequencer::new(self.config));
        kernel.spawn(Scoreboard::new(self.config, Box::new(stimulus)));
        kernel.run(&mut self.bench, self.config.run_limit())
    }

    /// Clock and reset only
    fn run_reset(&mut self) -> Result<SimTime, TbError> {
        let mut kernel = Kernel::new();
        kernel.spawn_background(Clock::new(self.config));
        kernel.spawn(ResetSequencer::new(self.config));
        kernel.run(&mut self.bench, None)
    }
}

#[test]
fn test_big_endian_word_lands_in_ram_byte_for_byte() -> Result<(), Box<dyn std::error::Error>> {
    let config = TbConfig::default().byte_order(ByteOrder::Big);
    let mut helper = BenchHelper::new(&config);
    helper.run(ScriptedStimulus::new().word(0x000, 0xDEAD_BEEF, 4, config.byte_order)?)?;

    assert_eq!(helper.bench.ram().read(0x000, 4)?, vec![0xDE, 0xAD, 0xBE, 0xEF]);
    assert_eq!(helper.bench.report(SimTime::ZERO).transactions_checked, 1);
    Ok(())
}

#[test]
fn test_zero_data_reads_back_as_zero() -> Result<(), Box<dyn std::error::Error>> {
    let config = TbConfig::default();
    let mut helper = BenchHelper::new(&config);
    // Dirty the location first so the zero write is observable
    helper.run(
        ScriptedStimulus::new()
            .word(0x004, 0xFFFF_FFFF, 4, ByteOrder::Little)?
            .word(0x004, 0, 4, ByteOrder::Little)?,
    )?;

    assert_eq!(helper.bench.ram().read(0x004, 4)?, vec![0; 4]);
    assert_eq!(helper.bench.report(SimTime::ZERO).transactions_checked, 2);
    Ok(())
}

#[test]
fn test_corrupted_write_is_reported_with_exact_byte() -> Result<(), Box<dyn std::error::Error>> {
    let config = TbConfig::default().byte_order(ByteOrder::Big);
    let fault = Fault::CorruptWrite {
        beat: 0,
        lane: 2,
        mask: 0x01,
    };
    let outcome = run(
        &config,
        Box::new(RegisterSlice::with_fault(fault, config.bus_bytes)?),
        Box::new(ScriptedStimulus::new().word(0x010, 0xDEAD_BEEF, 4, config.byte_order)?),
    );

    assert!(!outcome.passed());
    assert_eq!(outcome.failure_kind(), Some(FailureKind::DataIntegrity));
    let mismatches = outcome.mismatches();
    assert_eq!(mismatches.len(), 1);
    let mismatch = mismatches[0];
    assert_eq!(mismatch.address, 0x010);
    assert_eq!(mismatch.expected, vec![0xDE, 0xAD, 0xBE, 0xEF]);
    assert_eq!(mismatch.actual, vec![0xDE, 0xAD, 0xBF, 0xEF]);
    assert_eq!(mismatch.observed, Observed::BusRead);
    assert_eq!(mismatch.first_difference(), Some((0x012, 0xBE, 0xBF)));
    assert_eq!(outcome.report().transactions_checked, 0);
    Ok(())
}

#[test]
fn test_corruption_on_later_transaction_keeps_earlier_checks() -> Result<(), Box<dyn std::error::Error>> {
    let config = TbConfig::default();
    let fault = Fault::CorruptWrite {
        beat: 2,
        lane: 0,
        mask: 0x80,
    };
    let stimulus = ScriptedStimulus::new()
        .word(0x100, 1, 4, ByteOrder::Little)?
        .word(0x104, 2, 4, ByteOrder::Little)?
        .word(0x108, 3, 4, ByteOrder::Little)?;
    let outcome = run(
        &config,
        Box::new(RegisterSlice::with_fault(fault, config.bus_bytes)?),
        Box::new(stimulus),
    );

    assert_eq!(outcome.failure_kind(), Some(FailureKind::DataIntegrity));
    assert_eq!(outcome.report().transactions_checked, 2);
    assert_eq!(
        outcome.mismatches()[0].first_difference(),
        Some((0x108, 0x03, 0x83))
    );
    Ok(())
}

#[test]
fn test_last_word_in_ram_passes() -> Result<(), Box<dyn std::error::Error>> {
    let config = TbConfig::default();
    let last = config.ram_size - 4;
    let mut helper = BenchHelper::new(&config);
    helper.run(ScriptedStimulus::new().bytes(last, vec![1, 2, 3, 4]))?;
    assert_eq!(helper.bench.ram().read(last, 4)?, vec![1, 2, 3, 4]);
    Ok(())
}

#[test]
fn test_address_past_ram_is_a_configuration_error() -> Result<(), Box<dyn std::error::Error>> {
    let config = TbConfig::default();
    let outcome = run(
        &config,
        Box::new(RegisterSlice::new()),
        Box::new(ScriptedStimulus::new().bytes(config.ram_size, vec![0; 4])),
    );
    assert_eq!(outcome.failure_kind(), Some(FailureKind::Configuration));
    assert!(matches!(
        outcome.error(),
        Some(TbError::AddressOutOfRange { address: 4096, .. })
    ));
    Ok(())
}

#[test]
fn test_misaligned_address_is_a_configuration_error() -> Result<(), Box<dyn std::error::Error>> {
    let config = TbConfig::default();
    let outcome = run(
        &config,
        Box::new(RegisterSlice::new()),
        Box::new(ScriptedStimulus::new().bytes(0x002, vec![0; 4])),
    );
    assert_eq!(outcome.failure_kind(), Some(FailureKind::Configuration));
    Ok(())
}

#[test]
fn test_hung_read_path_times_out_instead_of_mismatching() -> Result<(), Box<dyn std::error::Error>> {
    let config = TbConfig::default().timeout_cycles(50);
    let outcome = run(
        &config,
        Box::new(RegisterSlice::with_fault(Fault::SwallowReadData, config.bus_bytes)?),
        Box::new(ScriptedStimulus::new().word(0x020, 0x1234_5678, 4, ByteOrder::Little)?),
    );

    assert_eq!(outcome.failure_kind(), Some(FailureKind::Timeout));
    assert!(outcome.mismatches().is_empty());
    match outcome.error() {
        Some(TbError::Timeout { cycles, waiting, .. }) => {
            assert_eq!(*cycles, 50);
            assert_eq!(waiting, "a bus response");
        }
        other => panic!("expected a timeout, got {other:?}"),
    }
    Ok(())
}

#[test]
fn test_run_limit_bounds_total_simulated_time() -> Result<(), Box<dyn std::error::Error>> {
    let config = TbConfig::default().run_limit_cycles(20);
    let outcome = run_behavioral(&config);
    assert_eq!(outcome.failure_kind(), Some(FailureKind::Timeout));
    assert!(outcome.report().cycles <= 20);
    Ok(())
}

#[test]
fn test_default_random_run_passes_under_backpressure() -> Result<(), Box<dyn std::error::Error>> {
    let config = TbConfig::default().backpressure(40);
    let outcome = run_behavioral(&config);
    assert!(outcome.passed(), "{outcome}");
    let report = outcome.into_result()?;
    assert_eq!(report.transactions_checked, 1000);
    assert_eq!(report.writes, 1000);
    assert_eq!(report.reads, 1000);
    Ok(())
}

#[test]
fn test_reset_leaves_no_accepted_handshakes() -> Result<(), Box<dyn std::error::Error>> {
    let config = TbConfig::default();
    let mut helper = BenchHelper::new(&config);
    helper.run_reset()?;

    let bench = &helper.bench;
    assert_eq!(bench.master().total_accepted(), 0);
    assert_eq!(bench.ram().total_accepted(), 0);
    assert_eq!(bench.monitor().total_handshakes(), 0);
    assert!(bench.master().is_idle());
    Ok(())
}

#[test]
fn test_monitor_counts_match_agent_counts() -> Result<(), Box<dyn std::error::Error>> {
    let config = TbConfig::default().iterations(50).backpressure(25);
    let mut helper = BenchHelper::new(&config);
    helper.run(axi_slice_tb::RandomStimulus::new(&config))?;

    let bench = &helper.bench;
    for channel in ChannelId::ALL {
        assert_eq!(
            bench.monitor().handshakes(PortId::Upstream, channel),
            bench.master().accepted(channel),
            "upstream {channel}"
        );
        assert_eq!(
            bench.monitor().handshakes(PortId::Downstream, channel),
            bench.ram().accepted(channel),
            "downstream {channel}"
        );
    }
    assert_eq!(bench.master().accepted(ChannelId::Aw), 50);
    assert_eq!(bench.master().accepted(ChannelId::R), 50);
    Ok(())
}
