//! HDL source units, their declared dependencies, and the resolved build plan

use std::collections::HashMap;
use std::fmt;

use camino::{Utf8Path, Utf8PathBuf};

use crate::config::TbConfig;
use crate::error::TbError;

/// A group of source files compiled together, e.g. a package directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceUnit {
    pub name: String,
    pub files: Vec<Utf8PathBuf>,
    pub depends_on: Vec<String>,
}

impl SourceUnit {
    pub fn new(name: &str, files: Vec<Utf8PathBuf>) -> Self {
        Self {
            name: name.to_string(),
            files,
            depends_on: Vec::new(),
        }
    }

    pub fn depends_on(mut self, unit: &str) -> Self {
        self.depends_on.push(unit.to_string());
        self
    }
}

/// Source units in declaration order.
#[derive(Debug, Clone, Default)]
pub struct SourceGraph {
    units: Vec<SourceUnit>,
}

impl SourceGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn unit(mut self, unit: SourceUnit) -> Self {
        self.units.push(unit);
        self
    }

    /// Orders the units so every unit follows its dependencies; among units
    /// whose dependencies are met, declaration order wins.
    pub fn resolve(&self) -> Result<Vec<&SourceUnit>, TbError> {
        let index: HashMap<&str, usize> = self
            .units
            .iter()
            .enumerate()
            .map(|(i, unit)| (unit.name.as_str(), i))
            .collect();
        if index.len() != self.units.len() {
            return Err(TbError::Config("duplicate source unit name".into()));
        }
        for unit in &self.units {
            for dep in &unit.depends_on {
                if !index.contains_key(dep.as_str()) {
                    return Err(TbError::Config(format!(
                        "source unit `{}` depends on unknown unit `{dep}`",
                        unit.name
                    )));
                }
            }
        }

        let mut placed = vec![false; self.units.len()];
        let mut order = Vec::with_capacity(self.units.len());
        while order.len() < self.units.len() {
            let next = self.units.iter().enumerate().find(|(i, unit)| {
                !placed[*i]
                    && unit
                        .depends_on
                        .iter()
                        .all(|dep| placed[index[dep.as_str()]])
            });
            match next {
                Some((i, unit)) => {
                    placed[i] = true;
                    order.push(unit);
                }
                None => {
                    let stuck: Vec<&str> = self
                        .units
                        .iter()
                        .enumerate()
                        .filter(|(i, _)| !placed[*i])
                        .map(|(_, unit)| unit.name.as_str())
                        .collect();
                    return Err(TbError::Config(format!(
                        "dependency cycle among source units: {}",
                        stuck.join(", ")
                    )));
                }
            }
        }
        Ok(order)
    }

    /// Flattened file list in dependency order.
    pub fn ordered_files(&self) -> Result<Vec<Utf8PathBuf>, TbError> {
        Ok(self
            .resolve()?
            .into_iter()
            .flat_map(|unit| unit.files.iter().cloned())
            .collect())
    }
}

/// Files in `dir` with one of `extensions`, sorted by name. Extensions are
/// listed in priority order, so `["v", "sv"]` puts all `.v` files first.
pub fn discover(dir: &Utf8Path, extensions: &[&str]) -> Result<Vec<Utf8PathBuf>, TbError> {
    let entries = dir
        .read_dir_utf8()
        .map_err(|e| TbError::Config(format!("cannot read source directory {dir}: {e}")))?;
    let mut files = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| TbError::Config(format!("{dir}: {e}")))?;
        let path = entry.path();
        if let Some(rank) = path
            .extension()
            .and_then(|ext| extensions.iter().position(|e| *e == ext))
        {
            files.push((rank, path.to_path_buf()));
        }
    }
    files.sort();
    Ok(files.into_iter().map(|(_, path)| path).collect())
}

/// Everything the external simulator needs to build the design under test.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildPlan {
    pub toplevel: String,
    pub sources: Vec<Utf8PathBuf>,
    pub includes: Vec<Utf8PathBuf>,
    pub build_dir: Utf8PathBuf,
    pub timescale: String,
    pub extra_args: Vec<String>,
}

impl BuildPlan {
    /// Resolves the standard tree under `root`: `bus_arch_sv_pkg/` holds the
    /// shared packages, `rtl/` the design, `skid_buffer/rtl/` the stage.
    pub fn for_tree(config: &TbConfig, root: &Utf8Path, module: &str) -> Result<Self, TbError> {
        let pkg_dir = root.join("bus_arch_sv_pkg");
        let graph = SourceGraph::new()
            .unit(SourceUnit::new("bus_arch_sv_pkg", discover(&pkg_dir, &["sv"])?))
            .unit(
                SourceUnit::new("rtl", discover(&root.join("rtl"), &["v", "sv"])?)
                    .depends_on("bus_arch_sv_pkg"),
            )
            .unit(
                SourceUnit::new("skid_buffer", discover(&root.join("skid_buffer/rtl"), &["sv"])?)
                    .depends_on("bus_arch_sv_pkg"),
            );
        Self::from_graph(config, &graph, vec![pkg_dir], root, module)
    }

    pub fn from_graph(
        config: &TbConfig,
        graph: &SourceGraph,
        includes: Vec<Utf8PathBuf>,
        root: &Utf8Path,
        module: &str,
    ) -> Result<Self, TbError> {
        let sources = graph.ordered_files()?;
        if sources.is_empty() {
            return Err(TbError::Config("no HDL sources found".into()));
        }
        Ok(Self {
            toplevel: config.dut.clone(),
            sources,
            includes,
            build_dir: root
                .join("run_dir")
                .join(format!("sim_build_{}_{module}", config.simulator)),
            timescale: config.timescale.to_string(),
            extra_args: config.simulator.extra_args(),
        })
    }
}

impl fmt::Display for BuildPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "toplevel:  {}", self.toplevel)?;
        writeln!(f, "timescale: {}", self.timescale)?;
        writeln!(f, "build dir: {}", self.build_dir)?;
        for inc in &self.includes {
            writeln!(f, "include:   {inc}")?;
        }
        for src in &self.sources {
            writeln!(f, "source:    {src}")?;
        }
        write!(f, "args:      {}", self.extra_args.join(" "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn files(names: &[&str]) -> Vec<Utf8PathBuf> {
        names.iter().map(Utf8PathBuf::from).collect()
    }

    #[test]
    fn test_dependencies_come_first_regardless_of_declaration() {
        let graph = SourceGraph::new()
            .unit(SourceUnit::new("rtl", files(&["rtl/slice.sv"])).depends_on("pkg"))
            .unit(SourceUnit::new("skid", files(&["skid/skid.sv"])).depends_on("pkg"))
            .unit(SourceUnit::new("pkg", files(&["pkg/axi_pkg.sv"])));
        let order = graph.ordered_files().unwrap();
        assert_eq!(
            order,
            files(&["pkg/axi_pkg.sv", "rtl/slice.sv", "skid/skid.sv"])
        );
    }

    #[test]
    fn test_cycle_and_unknown_dependency_are_rejected() {
        let cycle = SourceGraph::new()
            .unit(SourceUnit::new("a", files(&["a.sv"])).depends_on("b"))
            .unit(SourceUnit::new("b", files(&["b.sv"])).depends_on("a"));
        assert!(cycle.resolve().unwrap_err().to_string().contains("cycle"));

        let unknown = SourceGraph::new().unit(SourceUnit::new("a", vec![]).depends_on("zzz"));
        assert!(unknown.resolve().is_err());
    }

    #[test]
    fn test_plan_carries_backend_args_and_timescale() {
        let config = TbConfig::default();
        let graph = SourceGraph::new().unit(SourceUnit::new("pkg", files(&["pkg.sv"])));
        let plan =
            BuildPlan::from_graph(&config, &graph, vec![], Utf8Path::new("/work"), "test_basic")
                .unwrap();
        assert_eq!(plan.timescale, "1ns/1ps");
        assert_eq!(
            plan.build_dir,
            Utf8PathBuf::from("/work/run_dir/sim_build_verilator_test_basic")
        );
        assert!(plan.extra_args.contains(&"--trace-fst".to_string()));
        assert!(plan.to_string().contains("source:    pkg.sv"));
    }

    #[test]
    fn test_discover_orders_by_extension_then_name() {
        let dir = std::env::temp_dir().join(format!("axi_slice_tb_discover_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        for name in ["b.sv", "a.sv", "z.v", "notes.txt"] {
            std::fs::write(dir.join(name), "").unwrap();
        }
        let dir = Utf8PathBuf::from_path_buf(dir).unwrap();
        let found: Vec<String> = discover(&dir, &["v", "sv"])
            .unwrap()
            .iter()
            .map(|p| p.file_name().unwrap().to_string())
            .collect();
        assert_eq!(found, vec!["z.v", "a.sv", "b.sv"]);
        std::fs::remove_dir_all(&dir).unwrap();
        assert!(discover(&dir, &["sv"]).is_err());
    }
}
