// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! The experiment-driver JSON configuration and the synthetic-data runner
//! it describes.
//!
//! Grounded on `experiments/storage_explorer/ExperimentConfiguration.{hpp,cpp}`
//! (the JSON schema and its validation) and `DataGenerator.cpp` (the four
//! synthetic table schemas and the loop that loads tuples into rotating
//! blocks). Field names match spec §6 verbatim via
//! `#[serde(rename_all = "snake_case")]`.

use crate::allocator::SLOT;
use crate::block_manager::BlockManager;
use crate::catalog::{Attribute, AttributeId, Relation};
use crate::layout::{BloomDescriptor, IndexKind, Layout, TssbKind};
use crate::predicate::{ComparisonOp, Predicate};
use crate::insert_destination::{AlwaysNewDestination, InsertDestination};
use crate::scan::{parallel_scan, parallel_select};
use crate::tuple::Tuple;
use crate::value::{ConversionPolicy, Value, ValueType};
use crate::{Error, Result};
use rand::Rng;
use serde::Deserialize;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Which of the four synthetic schemas a run loads.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TableKind {
    /// 10 `Int` columns, each with an exponentially widening domain.
    NarrowE,
    /// 10 `Int` columns, each uniform over `[0, 1e8)`.
    NarrowU,
    /// 50 `Int` columns, each with a (narrower-stepping) exponential domain.
    WideE,
    /// 10 fixed-width 20-byte `Char` columns.
    Strings,
}

impl TableKind {
    /// Number of columns this table declares (the bound `sort_column` and
    /// `index_column` are validated against, spec §6).
    #[must_use]
    pub fn arity(self) -> usize {
        match self {
            Self::NarrowE | Self::NarrowU | Self::Strings => 10,
            Self::WideE => 50,
        }
    }

    /// The per-column value domain sizes for the integer tables, matching
    /// `NarrowEDataGenerator`/`NarrowUDataGenerator`/`WideEDataGenerator`'s
    /// constructors. Returns `None` for `Strings`, which has no numeric
    /// domain.
    #[must_use]
    pub fn column_ranges(self) -> Option<Vec<i64>> {
        match self {
            Self::NarrowE => Some(
                (0..10)
                    .map(|col| 2f64.powf(f64::from(col + 1) * 2.7) as i64)
                    .collect(),
            ),
            Self::WideE => Some(
                (0..50)
                    .map(|col| 2f64.powf(4.0 + f64::from(col + 1) * 0.46) as i64)
                    .collect(),
            ),
            Self::NarrowU => Some(vec![100_000_000; 10]),
            Self::Strings => None,
        }
    }

    fn relation_name(self) -> &'static str {
        match self {
            Self::NarrowE => "NarrowE",
            Self::NarrowU => "NarrowU",
            Self::WideE => "WideE",
            Self::Strings => "Strings",
        }
    }

    /// Builds the [`Relation`] this table kind describes.
    #[must_use]
    pub fn relation(self) -> Relation {
        let attrs = match self {
            Self::Strings => (0..self.arity())
                .map(|i| {
                    Attribute::new(
                        i as AttributeId,
                        format!("charcol{i}"),
                        ValueType::Char { len: 20 },
                        false,
                    )
                })
                .collect(),
            _ => (0..self.arity())
                .map(|i| {
                    Attribute::new(
                        i as AttributeId,
                        format!("intcol{i}"),
                        ValueType::Int,
                        false,
                    )
                })
                .collect(),
        };
        Relation::new(self.relation_name(), attrs)
    }
}

/// Which concrete tuple-store family a layout uses.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LayoutKind {
    /// Fixed-stride row store.
    Rowstore,
    /// Column store kept sorted on `sort_column`.
    Columnstore,
}

/// One predicate-driven test to run against the loaded table.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct PredicateTest {
    /// Which column the predicate compares.
    pub predicate_column: AttributeId,
    /// Whether an equality-hash index should be built over `predicate_column`
    /// and preferred by the scan.
    pub use_index: bool,
    /// Whether matches should be sorted by tuple id before projection
    /// (only meaningful for unordered/parallel result sets).
    pub sort_matches_before_projection: bool,
    /// Target fraction of tuples the generated predicate should match,
    /// in `(0, 1]`.
    pub selectivity: f64,
    /// Number of leading attributes to project matches down to.
    pub projection_width: usize,
}

fn default_true() -> bool {
    true
}

/// The experiment-driver configuration: which table to synthesize, how to
/// lay it out, and which predicate tests to run over it. Deserialized
/// directly from the JSON schema in spec §6; see [`ExperimentConfig::new`]
/// for the programmatic builder-style constructor used by tests.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ExperimentConfig {
    /// Selects block-backed storage. The engine this crate implements is
    /// block-based only; `false` is accepted but rejected by [`Self::validate`]
    /// (a flat/file-based tuple store is out of scope, spec.md Non-goals).
    #[serde(default = "default_true")]
    pub use_blocks: bool,
    /// Which synthetic schema to load.
    pub table: TableKind,
    /// How many tuples to generate.
    pub num_tuples: usize,
    /// Row or column layout.
    pub layout_type: LayoutKind,
    /// Required (and validated against table arity) when `layout_type` is
    /// `columnstore`.
    #[serde(default)]
    pub sort_column: Option<AttributeId>,
    /// Whether every column is eligible for compression.
    #[serde(default)]
    pub use_compression: bool,
    /// Whether a bloom filter is built over `index_column` (defaults to
    /// true per spec §6).
    #[serde(default = "default_true")]
    pub use_bloom_filter: bool,
    /// Optional equality-hash index column (validated against table arity).
    #[serde(default)]
    pub index_column: Option<AttributeId>,
    /// How many times to repeat the full load-and-test cycle.
    #[serde(default = "one")]
    pub num_runs: usize,
    /// Number of parallel scan worker threads.
    #[serde(default = "one")]
    pub num_threads: usize,
    /// Optional per-worker CPU affinity, length must equal `num_threads`.
    #[serde(default)]
    pub thread_affinities: Option<Vec<i32>>,
    /// Accepted for schema fidelity; measuring cache misses requires
    /// platform perf-counter support (Intel PCM in the original) that is
    /// out of scope here, so this only gates a log warning.
    #[serde(default)]
    pub measure_cache_misses: bool,
    /// Block size, in megabytes (one [`crate::allocator::SLOT`] per MB).
    pub block_size_mb: usize,
    /// The predicate tests to run once the table is loaded.
    #[serde(default)]
    pub tests: Vec<PredicateTest>,
}

fn one() -> usize {
    1
}

impl ExperimentConfig {
    /// Builds a minimal configuration with every optional field at its
    /// default, for programmatic construction (tests, embedding) rather
    /// than JSON loading.
    #[must_use]
    pub fn new(table: TableKind, num_tuples: usize) -> Self {
        Self {
            use_blocks: true,
            table,
            num_tuples,
            layout_type: LayoutKind::Rowstore,
            sort_column: None,
            use_compression: false,
            use_bloom_filter: true,
            index_column: None,
            num_runs: 1,
            num_threads: 1,
            thread_affinities: None,
            measure_cache_misses: false,
            block_size_mb: 1,
            tests: Vec::new(),
        }
    }

    /// Sets the layout kind and (for `Columnstore`) its sort column.
    #[must_use]
    pub fn with_layout(
        mut self,
        layout_type: LayoutKind,
        sort_column: Option<AttributeId>,
    ) -> Self {
        self.layout_type = layout_type;
        self.sort_column = sort_column;
        self
    }

    /// Enables or disables per-attribute compression.
    #[must_use]
    pub fn with_compression(mut self, use_compression: bool) -> Self {
        self.use_compression = use_compression;
        self
    }

    /// Enables or disables the bloom filter.
    #[must_use]
    pub fn with_bloom_filter(mut self, use_bloom_filter: bool) -> Self {
        self.use_bloom_filter = use_bloom_filter;
        self
    }

    /// Sets the equality-hash index column.
    #[must_use]
    pub fn with_index_column(mut self, index_column: Option<AttributeId>) -> Self {
        self.index_column = index_column;
        self
    }

    /// Sets the number of repeated runs.
    #[must_use]
    pub fn with_num_runs(mut self, num_runs: usize) -> Self {
        self.num_runs = num_runs;
        self
    }

    /// Sets the scan worker thread count and optional affinities.
    #[must_use]
    pub fn with_num_threads(
        mut self,
        num_threads: usize,
        thread_affinities: Option<Vec<i32>>,
    ) -> Self {
        self.num_threads = num_threads;
        self.thread_affinities = thread_affinities;
        self
    }

    /// Sets the block size in megabytes.
    #[must_use]
    pub fn with_block_size_mb(mut self, block_size_mb: usize) -> Self {
        self.block_size_mb = block_size_mb;
        self
    }

    /// Sets the predicate tests to run.
    #[must_use]
    pub fn with_tests(mut self, tests: Vec<PredicateTest>) -> Self {
        self.tests = tests;
        self
    }

    /// Loads a configuration from a JSON file on disk.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the file cannot be read, [`Error::Json`] if
    /// it does not parse, or [`Error::Config`] if it parses but fails
    /// [`Self::validate`].
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Validates this configuration against table arity and the other
    /// structural constraints spec §6 names, mirroring
    /// `ExperimentConfiguration::LoadFromJSON`'s field checks.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] describing the first violation found.
    pub fn validate(&self) -> Result<()> {
        if !self.use_blocks {
            return Err(Error::Config(
                "use_blocks=false (file-based tuple stores) is not supported".to_string(),
            ));
        }
        if self.num_tuples == 0 {
            return Err(Error::Config("num_tuples must be positive".to_string()));
        }
        if self.num_runs == 0 {
            return Err(Error::Config("num_runs must be positive".to_string()));
        }
        if self.num_threads == 0 {
            return Err(Error::Config("num_threads must be positive".to_string()));
        }
        if self.block_size_mb == 0 {
            return Err(Error::Config("block_size_mb must be positive".to_string()));
        }
        let arity = self.table.arity();
        if let Some(col) = self.sort_column {
            if col as usize >= arity {
                return Err(Error::Config(format!(
                    "sort_column {col} out of range for table arity {arity}"
                )));
            }
        } else if matches!(self.layout_type, LayoutKind::Columnstore) {
            return Err(Error::Config(
                "columnstore layout requires sort_column".to_string(),
            ));
        }
        if let Some(col) = self.index_column {
            if col as usize >= arity {
                return Err(Error::Config(format!(
                    "index_column {col} out of range for table arity {arity}"
                )));
            }
        }
        if let Some(affinities) = &self.thread_affinities {
            if affinities.len() != self.num_threads {
                return Err(Error::Config(
                    "thread_affinities length must equal num_threads".to_string(),
                ));
            }
        }
        for test in &self.tests {
            if test.predicate_column as usize >= arity {
                return Err(Error::Config(format!(
                    "predicate_column {} out of range for table arity {arity}",
                    test.predicate_column
                )));
            }
            if !(0.0..=1.0).contains(&test.selectivity) || test.selectivity == 0.0 {
                return Err(Error::Config(format!(
                    "selectivity {} must be in (0, 1]",
                    test.selectivity
                )));
            }
            if test.projection_width > arity {
                return Err(Error::Config(format!(
                    "projection_width {} exceeds table arity {arity}",
                    test.projection_width
                )));
            }
            if test.use_index && self.index_column != Some(test.predicate_column) {
                return Err(Error::Config(format!(
                    "test requests use_index over column {} but index_column is {:?}",
                    test.predicate_column, self.index_column
                )));
            }
        }
        Ok(())
    }

    fn tssb_kind(&self, relation: &Relation) -> TssbKind {
        let compressed_attributes = if self.use_compression {
            (0..relation.num_attributes() as AttributeId).collect()
        } else {
            Vec::new()
        };
        match (self.layout_type, self.use_compression) {
            (LayoutKind::Rowstore, false) => TssbKind::RowStore,
            (LayoutKind::Rowstore, true) => TssbKind::CompressedRowStore {
                compressed_attributes,
            },
            (LayoutKind::Columnstore, false) => TssbKind::SortColumn {
                sort_attribute: self.sort_column.expect("validated"),
            },
            (LayoutKind::Columnstore, true) => TssbKind::CompressedSortColumn {
                sort_attribute: self.sort_column.expect("validated"),
                compressed_attributes,
            },
        }
    }

    fn layout(&self, relation: &Relation) -> Layout {
        let indexes = self
            .index_column
            .map(|attribute| vec![IndexKind::EqualityHash { attribute }])
            .unwrap_or_default();
        let bloom = self
            .index_column
            .filter(|_| self.use_bloom_filter)
            .map(|attribute| BloomDescriptor { attribute });
        let num_slots = (self.block_size_mb * 1_048_576 / SLOT).max(1);
        Layout::new(
            relation,
            self.tssb_kind(relation),
            indexes,
            bloom,
            num_slots,
        )
    }

    /// Generates one synthetic tuple, drawing values uniformly from each
    /// column's domain (`GenerateRandomInt`'s uniform-rejection-sampling
    /// behaviour is delegated to `rand`'s own uniform range sampler).
    fn generate_tuple(&self, rng: &mut impl Rng) -> Tuple {
        match self.table.column_ranges() {
            Some(ranges) => Tuple::new(
                ranges
                    .iter()
                    .map(|&r| Value::Int(rng.random_range(0..r)))
                    .collect(),
            ),
            None => Tuple::new(
                (0..self.table.arity())
                    .map(|_| {
                        let s: String = (0..20)
                            .map(|_| rng.random_range(b'a'..=b'z') as char)
                            .collect();
                        Value::Char(s.into_bytes())
                    })
                    .collect(),
            ),
        }
    }

    /// Builds a predicate targeting approximately `selectivity` of the
    /// loaded tuples on `column`, analogous to
    /// `NumericDataGenerator::generatePredicate` but using `>=` rather than
    /// equality so that the target selectivity is actually achieved for a
    /// uniformly distributed domain (the original's use of an equality
    /// comparison cannot realize an arbitrary selectivity target; this is
    /// a correction, not a faithful port).
    fn predicate_for(&self, column: AttributeId, selectivity: f64) -> Predicate {
        if selectivity >= 1.0 {
            return Predicate::TrivialTrue;
        }
        match self.table.column_ranges() {
            Some(ranges) => {
                let range = ranges[column as usize];
                #[allow(clippy::cast_possible_truncation)]
                let threshold = ((1.0 - selectivity) * range as f64) as i64;
                Predicate::compare(column, ComparisonOp::Ge, Value::Int(threshold))
            }
            None => {
                // No numeric domain to threshold; strings fall back to an
                // equality match against a fixed value, which is the
                // `StringsDataGenerator` source's behaviour (it never
                // overrides `generatePredicate` for selectivity targeting).
                Predicate::compare(
                    column,
                    ComparisonOp::Eq,
                    Value::Char(b"aaaaaaaaaaaaaaaaaaaa".to_vec()),
                )
            }
        }
    }

    /// Runs this configuration once: loads `num_tuples` synthetic tuples
    /// into rotating blocks (grounded on `DataGenerator::generateData`'s
    /// insert-then-rebuild-on-full loop), then evaluates each of `tests`
    /// with [`parallel_scan`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if `self` fails [`Self::validate`].
    pub fn run(&self) -> Result<ExperimentReport> {
        self.validate()?;
        let relation = self.table.relation();
        let layout = self.layout(&relation);

        let mut manager = BlockManager::new();
        let mut rng = rand::rng();
        let mut current = manager.create(relation.clone(), layout.clone())?;

        let load_started = Instant::now();
        for _ in 0..self.num_tuples {
            let tuple = self.generate_tuple(&mut rng);
            loop {
                match manager
                    .get_mut(current)
                    .insert_in_batch(&tuple, ConversionPolicy::Exact)
                {
                    Ok(_) => break,
                    Err(Error::BlockFull) => {
                        manager.get_mut(current).rebuild();
                        current = manager.create(relation.clone(), layout.clone())?;
                    }
                    Err(e) => return Err(e),
                }
            }
        }
        manager.get_mut(current).rebuild();
        let load_elapsed = load_started.elapsed();

        let manager = Arc::new(manager);
        let block_ids = manager.block_ids();
        let mut test_reports = Vec::with_capacity(self.tests.len());
        for test in &self.tests {
            let predicate = Arc::new(self.predicate_for(test.predicate_column, test.selectivity));
            let scan_started = Instant::now();
            let matched = if test.projection_width > 0 {
                let project = Arc::new((0..test.projection_width as AttributeId).collect::<Vec<_>>());
                let projected_attrs: Vec<Attribute> = project
                    .iter()
                    .map(|&a| relation.attribute(a).clone())
                    .collect();
                let projected_relation = Relation::new("projection", projected_attrs);
                let projected_layout =
                    Layout::new(&projected_relation, TssbKind::RowStore, vec![], None, layout.num_slots());
                let dest_manager = Arc::new(Mutex::new(BlockManager::new()));
                let destination: Arc<dyn InsertDestination> = Arc::new(AlwaysNewDestination::new(
                    projected_relation,
                    projected_layout,
                ));
                parallel_select(
                    &manager,
                    &dest_manager,
                    &destination,
                    block_ids.clone(),
                    &predicate,
                    &project,
                    self.num_threads,
                );
                let dest_manager = dest_manager.lock().expect("dest manager mutex poisoned");
                destination
                    .touched_blocks()
                    .iter()
                    .map(|&id| dest_manager.get(id).num_tuples())
                    .sum()
            } else {
                let mut results = parallel_scan(
                    &manager,
                    block_ids.clone(),
                    &predicate,
                    self.num_threads,
                    self.thread_affinities.as_deref(),
                );
                if test.sort_matches_before_projection {
                    results.sort_by_key(|r| r.block_id);
                    for result in &mut results {
                        result.tuple_ids.sort_unstable();
                    }
                }
                results.iter().map(|r| r.tuple_ids.len()).sum()
            };
            test_reports.push(PredicateTestReport {
                predicate_column: test.predicate_column,
                matched_tuples: matched,
                elapsed: scan_started.elapsed(),
            });
        }

        Ok(ExperimentReport {
            table: self.table,
            num_tuples_loaded: self.num_tuples,
            num_blocks: block_ids.len(),
            load_elapsed,
            tests: test_reports,
        })
    }
}

/// One predicate test's outcome.
#[derive(Clone, Debug)]
pub struct PredicateTestReport {
    /// The column the predicate compared.
    pub predicate_column: AttributeId,
    /// Total matches found across every scanned block.
    pub matched_tuples: usize,
    /// Wall-clock time spent scanning.
    pub elapsed: Duration,
}

/// The outcome of one [`ExperimentConfig::run`] call.
#[derive(Clone, Debug)]
pub struct ExperimentReport {
    /// The table that was loaded.
    pub table: TableKind,
    /// Tuples actually generated and loaded.
    pub num_tuples_loaded: usize,
    /// Number of blocks the load rotated through.
    pub num_blocks: usize,
    /// Wall-clock time spent loading.
    pub load_elapsed: Duration,
    /// Per-test outcomes, in declaration order.
    pub tests: Vec<PredicateTestReport>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn narrow_e_domains_widen_exponentially() {
        let ranges = TableKind::NarrowE.column_ranges().unwrap();
        assert_eq!(ranges.len(), 10);
        assert!(ranges.windows(2).all(|w| w[1] > w[0]));
    }

    #[test]
    fn rejects_columnstore_without_sort_column() {
        let config = ExperimentConfig::new(TableKind::NarrowE, 100)
            .with_layout(LayoutKind::Columnstore, None);
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_out_of_range_index_column() {
        let config = ExperimentConfig::new(TableKind::NarrowU, 100).with_index_column(Some(99));
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_mismatched_thread_affinities() {
        let config =
            ExperimentConfig::new(TableKind::NarrowU, 100).with_num_threads(2, Some(vec![0]));
        assert!(config.validate().is_err());
    }

    #[test]
    fn run_loads_tuples_and_matches_predicate() {
        let config = ExperimentConfig::new(TableKind::NarrowU, 500)
            .with_index_column(Some(0))
            .with_tests(vec![PredicateTest {
                predicate_column: 0,
                use_index: true,
                sort_matches_before_projection: true,
                selectivity: 0.5,
                projection_width: 1,
            }]);
        let report = config.run().unwrap();
        assert_eq!(report.num_tuples_loaded, 500);
        assert_eq!(report.tests.len(), 1);
        let matched = report.tests[0].matched_tuples as f64 / 500.0;
        assert!((matched - 0.5).abs() < 0.15);
    }

    #[test]
    fn rejects_use_index_without_matching_index_column() {
        let config = ExperimentConfig::new(TableKind::NarrowU, 100)
            .with_index_column(Some(1))
            .with_tests(vec![PredicateTest {
                predicate_column: 0,
                use_index: true,
                sort_matches_before_projection: false,
                selectivity: 0.5,
                projection_width: 0,
            }]);
        assert!(config.validate().is_err());
    }

    #[test]
    fn run_with_projection_width_counts_projected_tuples() {
        let config = ExperimentConfig::new(TableKind::NarrowU, 200).with_tests(vec![PredicateTest {
            predicate_column: 0,
            use_index: false,
            sort_matches_before_projection: false,
            selectivity: 1.0,
            projection_width: 2,
        }]);
        let report = config.run().unwrap();
        assert_eq!(report.tests[0].matched_tuples, 200);
    }

    #[test]
    fn run_over_strings_table_completes() {
        let config =
            ExperimentConfig::new(TableKind::Strings, 50).with_tests(vec![PredicateTest {
                predicate_column: 0,
                use_index: false,
                sort_matches_before_projection: false,
                selectivity: 1.0,
                projection_width: 1,
            }]);
        let report = config.run().unwrap();
        assert_eq!(report.tests[0].matched_tuples, 50);
    }

    #[test]
    fn json_schema_round_trips() {
        let json = r#"{
            "table": "wide_e",
            "num_tuples": 10,
            "layout_type": "columnstore",
            "sort_column": 0,
            "block_size_mb": 1,
            "tests": [
                {"predicate_column": 0, "use_index": false, "sort_matches_before_projection": false, "selectivity": 0.5, "projection_width": 2}
            ]
        }"#;
        let config: ExperimentConfig = serde_json::from_str(json).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.table, TableKind::WideE);
        assert!(config.use_bloom_filter);
    }
}
