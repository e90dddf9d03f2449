use axi_slice_tb::{run_behavioral, run_with_wall_clock_limit, BuildPlan, TbConfig, TestOutcome};
use eyre::Result;

#[cfg(feature = "verilator")]
fn run_verilated(config: &TbConfig, plan: &BuildPlan) -> Result<TestOutcome> {
    use axi_slice_tb::verilator::{create_runtime, VerilatedSlice};
    use axi_slice_tb::{run, RandomStimulus};

    let runtime = create_runtime(plan)?;
    let dut = VerilatedSlice::new(&runtime, plan, config.bus_bytes)?;
    println!("✅ {} model created!", config.dut);
    Ok(run(
        config,
        Box::new(dut),
        Box::new(RandomStimulus::new(config)),
    ))
}

#[cfg(not(feature = "verilator"))]
fn run_verilated(_config: &TbConfig, _plan: &BuildPlan) -> Result<TestOutcome> {
    Err(eyre::eyre!(
        "built without the `verilator` feature; rebuild with --features verilator"
    ))
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    println!("🚀 AXI register slice testbench starting...");

    let config = TbConfig::from_env()?;
    println!(
        "⚙️  DUT {} on {} ({}), {} iterations, seed {:#x}",
        config.dut, config.simulator, config.timescale, config.iterations, config.seed
    );

    let plan = match &config.rtl_root {
        Some(root) => {
            let plan = BuildPlan::for_tree(&config, root, "test_basic")?;
            log::info!("build plan:\n{plan}");
            Some(plan)
        }
        None => None,
    };

    let outcome = match plan {
        Some(plan) if config.simulator == axi_slice_tb::Simulator::Verilator => {
            run_verilated(&config, &plan)?
        }
        _ => {
            println!("🧪 Running against the behavioral register slice");
            let limit = config.wall_clock_limit;
            match limit {
                Some(limit) => run_with_wall_clock_limit(config, limit).await?,
                None => run_behavioral(&config),
            }
        }
    };

    println!("{outcome}");
    let report = outcome.into_result()?;
    println!(
        "🎉 All tests passed! {} transactions, {} cycles",
        report.transactions_checked, report.cycles
    );
    Ok(())
}
