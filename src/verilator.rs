//! Verilator-backed DUT, driven through marlin's dynamic model interface

use camino::Utf8Path;
use eyre::Result;
use log::{debug, info, warn};
use marlin::verilator::dynamic::{DynamicVerilatedModel, VerilatorValue};
use marlin::verilator::{
    AsDynamicVerilatedModel, PortDirection, VerilatedModelConfig, VerilatorRuntime,
    VerilatorRuntimeOptions,
};

use crate::axi::{AddrBeat, AxiPort, Burst, Bus, Resp};
use crate::error::TbError;
use crate::slice::PipelineStage;
use crate::sources::BuildPlan;

const ADDR_BITS: usize = 32;

pub fn create_runtime(plan: &BuildPlan) -> Result<VerilatorRuntime> {
    let sources: Vec<&Utf8Path> = plan.sources.iter().map(|p| p.as_path()).collect();
    let includes: Vec<&Utf8Path> = plan.includes.iter().map(|p| p.as_path()).collect();
    info!("verilating {} sources into {}", sources.len(), plan.build_dir);

    VerilatorRuntime::new(
        &plan.build_dir,
        &sources,
        &includes,
        [],
        VerilatorRuntimeOptions::default_logging(),
    )
    .map_err(|e| eyre::eyre!("Failed to create runtime: {}", e))
}

/// Translates the plan's backend arguments into marlin's model options:
/// `--trace*` enables tracing and `--Wno-<W>` silences warning `W`. Flags
/// marlin has no option for are reported and skipped.
pub fn model_config(plan: &BuildPlan) -> VerilatedModelConfig {
    let mut config = VerilatedModelConfig::default();
    for arg in &plan.extra_args {
        if let Some(warning) = arg.strip_prefix("--Wno-").or_else(|| arg.strip_prefix("-Wno-")) {
            config.ignored_warnings.push(warning.to_string());
        } else if arg.starts_with("--trace") {
            config.enable_tracing = true;
        } else {
            warn!("{arg} has no marlin model option, skipping it");
        }
    }
    info!(
        "model options: tracing {}, ignored warnings [{}], timescale {}",
        config.enable_tracing,
        config.ignored_warnings.join(", "),
        plan.timescale
    );
    config
}

/// Which side of the slice a port list describes, by HDL prefix.
#[derive(Clone, Copy)]
enum Side {
    /// `slave_*`, facing the master agent
    Slave,
    /// `master_*`, facing the RAM
    Master,
}

impl Side {
    fn prefix(self) -> &'static str {
        match self {
            Side::Slave => "slave",
            Side::Master => "master",
        }
    }

    /// Whether signals driven by the manager of this link are DUT inputs.
    fn manager_drives_dut(self) -> bool {
        matches!(self, Side::Slave)
    }
}

/// Port name, msb, lsb, and whether the DUT reads it.
type PortSpec = (String, usize, usize, bool);

fn direction(input: bool) -> PortDirection {
    if input {
        PortDirection::Input
    } else {
        PortDirection::Output
    }
}

fn axi_ports(side: Side, data_bits: usize) -> Vec<PortSpec> {
    let m = side.manager_drives_dut();
    let s = !m;
    let strb_bits = data_bits / 8;
    let signals = [
        ("awaddr", ADDR_BITS, m),
        ("awlen", 8, m),
        ("awsize", 3, m),
        ("awburst", 2, m),
        ("awvalid", 1, m),
        ("awready", 1, s),
        ("wdata", data_bits, m),
        ("wstrb", strb_bits, m),
        ("wlast", 1, m),
        ("wvalid", 1, m),
        ("wready", 1, s),
        ("bresp", 2, s),
        ("bvalid", 1, s),
        ("bready", 1, m),
        ("araddr", ADDR_BITS, m),
        ("arlen", 8, m),
        ("arsize", 3, m),
        ("arburst", 2, m),
        ("arvalid", 1, m),
        ("arready", 1, s),
        ("rdata", data_bits, s),
        ("rresp", 2, s),
        ("rlast", 1, s),
        ("rvalid", 1, s),
        ("rready", 1, m),
    ];
    signals
        .into_iter()
        .map(|(name, bits, dir)| (format!("{}_{name}", side.prefix()), bits - 1, 0, dir))
        .collect()
}

/// The register slice RTL, compiled by Verilator and stepped one clock
/// cycle per `tick`.
pub struct VerilatedSlice<'ctx> {
    model: DynamicVerilatedModel<'ctx>,
    name: String,
    widths: Vec<(String, usize)>,
}

impl<'ctx> VerilatedSlice<'ctx> {
    pub fn new(runtime: &'ctx VerilatorRuntime, plan: &BuildPlan, bus_bytes: usize) -> Result<Self> {
        let top = plan
            .sources
            .iter()
            .find(|src| src.file_stem() == Some(plan.toplevel.as_str()))
            .ok_or_else(|| eyre::eyre!("no source file defines {}", plan.toplevel))?;

        let mut ports = vec![
            ("clk".to_string(), 0, 0, true),
            ("arst".to_string(), 0, 0, true),
        ];
        ports.extend(axi_ports(Side::Slave, bus_bytes * 8));
        ports.extend(axi_ports(Side::Master, bus_bytes * 8));
        let widths = ports
            .iter()
            .map(|(name, msb, lsb, _)| (name.clone(), msb - lsb + 1))
            .collect();
        let port_refs: Vec<(&str, usize, usize, PortDirection)> = ports
            .iter()
            .map(|(name, msb, lsb, input)| (name.as_str(), *msb, *lsb, direction(*input)))
            .collect();

        let model = runtime
            .create_dyn_model(
                &plan.toplevel,
                top.as_str(),
                &port_refs,
                model_config(plan),
            )
            .map_err(|e| eyre::eyre!("Failed to create {} model: {:?}", plan.toplevel, e))?;
        info!("✅ {} model created ({} ports)", plan.toplevel, port_refs.len());

        Ok(Self {
            model,
            name: plan.toplevel.clone(),
            widths,
        })
    }

    fn width(&self, port: &str) -> Result<usize, TbError> {
        self.widths
            .iter()
            .find(|(name, _)| name == port)
            .map(|(_, bits)| *bits)
            .ok_or_else(|| TbError::Simulator(format!("unknown port {port}")))
    }

    fn pin(&mut self, port: &str, value: u64) -> Result<(), TbError> {
        let result = match self.width(port)? {
            0..=8 => self.model.pin(port, value as u8),
            9..=16 => self.model.pin(port, value as u16),
            17..=32 => self.model.pin(port, value as u32),
            _ => self.model.pin(port, value),
        };
        result.map_err(|e| TbError::Simulator(format!("pin {port}: {e:?}")))
    }

    fn read(&self, port: &str) -> Result<u64, TbError> {
        let value = self
            .model
            .read(port)
            .map_err(|e| TbError::Simulator(format!("read {port}: {e:?}")))?;
        match value {
            VerilatorValue::CData(v) => Ok(v as u64),
            VerilatorValue::SData(v) => Ok(v as u64),
            VerilatorValue::IData(v) => Ok(v as u64),
            VerilatorValue::QData(v) => Ok(v),
        }
    }

    fn flag(&self, port: &str) -> Result<bool, TbError> {
        Ok(self.read(port)? != 0)
    }

    fn pin_addr(&mut self, prefix: &str, beat: &AddrBeat) -> Result<(), TbError> {
        self.pin(&format!("{prefix}addr"), beat.addr)?;
        self.pin(&format!("{prefix}len"), beat.len as u64)?;
        self.pin(&format!("{prefix}size"), beat.size as u64)?;
        self.pin(&format!("{prefix}burst"), beat.burst as u64)
    }

    fn read_addr(&self, prefix: &str) -> Result<AddrBeat, TbError> {
        Ok(AddrBeat {
            addr: self.read(&format!("{prefix}addr"))?,
            len: self.read(&format!("{prefix}len"))? as u8,
            size: self.read(&format!("{prefix}size"))? as u8,
            burst: Burst::from_bits(self.read(&format!("{prefix}burst"))? as u8),
        })
    }

    /// Applies what the master agent drives on the `slave_*` side and what
    /// the RAM drives on the `master_*` side.
    fn pin_inputs(&mut self, bus: &Bus) -> Result<(), TbError> {
        let up = &bus.upstream;
        self.pin("slave_awvalid", up.aw.valid as u64)?;
        self.pin_addr("slave_aw", &up.aw.payload)?;
        self.pin("slave_wvalid", up.w.valid as u64)?;
        self.pin("slave_wdata", up.w.payload.data)?;
        self.pin("slave_wstrb", up.w.payload.strb as u64)?;
        self.pin("slave_wlast", up.w.payload.last as u64)?;
        self.pin("slave_bready", up.b.ready as u64)?;
        self.pin("slave_arvalid", up.ar.valid as u64)?;
        self.pin_addr("slave_ar", &up.ar.payload)?;
        self.pin("slave_rready", up.r.ready as u64)?;

        let down = &bus.downstream;
        self.pin("master_awready", down.aw.ready as u64)?;
        self.pin("master_wready", down.w.ready as u64)?;
        self.pin("master_bvalid", down.b.valid as u64)?;
        self.pin("master_bresp", down.b.payload.resp as u64)?;
        self.pin("master_arready", down.ar.ready as u64)?;
        self.pin("master_rvalid", down.r.valid as u64)?;
        self.pin("master_rdata", down.r.payload.data)?;
        self.pin("master_rresp", down.r.payload.resp as u64)?;
        self.pin("master_rlast", down.r.payload.last as u64)
    }

    fn read_outputs(&self, up: &mut AxiPort, down: &mut AxiPort) -> Result<(), TbError> {
        up.aw.ready = self.flag("slave_awready")?;
        up.w.ready = self.flag("slave_wready")?;
        up.b.valid = self.flag("slave_bvalid")?;
        up.b.payload.resp = Resp::from_bits(self.read("slave_bresp")? as u8);
        up.ar.ready = self.flag("slave_arready")?;
        up.r.valid = self.flag("slave_rvalid")?;
        up.r.payload.data = self.read("slave_rdata")?;
        up.r.payload.resp = Resp::from_bits(self.read("slave_rresp")? as u8);
        up.r.payload.last = self.flag("slave_rlast")?;

        down.aw.valid = self.flag("master_awvalid")?;
        down.aw.payload = self.read_addr("master_aw")?;
        down.w.valid = self.flag("master_wvalid")?;
        down.w.payload.data = self.read("master_wdata")?;
        down.w.payload.strb = self.read("master_wstrb")? as u8;
        down.w.payload.last = self.flag("master_wlast")?;
        down.b.ready = self.flag("master_bready")?;
        down.ar.valid = self.flag("master_arvalid")?;
        down.ar.payload = self.read_addr("master_ar")?;
        down.r.ready = self.flag("master_rready")?;
        Ok(())
    }
}

impl PipelineStage for VerilatedSlice<'_> {
    fn name(&self) -> &str {
        &self.name
    }

    fn reset(&mut self, next: &mut Bus) -> Result<(), TbError> {
        self.pin("arst", 1)?;
        self.model.eval();
        let Bus {
            upstream, downstream, ..
        } = next;
        self.read_outputs(upstream, downstream)
    }

    fn tick(&mut self, sampled: &Bus, next: &mut Bus) -> Result<(), TbError> {
        self.pin_inputs(sampled)?;
        self.pin("arst", 0)?;
        self.pin("clk", 0)?;
        self.model.eval();
        self.pin("clk", 1)?;
        self.model.eval();
        debug!("{}: clocked", self.name);
        let Bus {
            upstream, downstream, ..
        } = next;
        self.read_outputs(upstream, downstream)
    }
}
