pub mod scatter;
pub mod stats;
mod writer;

use std::collections::BTreeMap;
use std::fmt::Display;
use std::path::{Path, PathBuf};

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

pub use scatter::{ComparisonView, ScatterView};
pub use stats::{ClusterDetailsView, StatisticsView};
pub use writer::write_reports;

use crate::analysis::TargetDims;

/// File stem used when the output path has none.
const DEFAULT_STEM: &str = "cluster_visualization";

/// How scatter points are grouped into traces.
#[derive(ValueEnum, Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ColorBy {
    /// One trace per message type
    #[default]
    Type,
    /// One trace per cluster label
    Cluster,
}

impl Display for ColorBy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ColorBy::Type => "type",
            ColorBy::Cluster => "cluster",
        };
        write!(f, "{}", s)
    }
}

/// A labelled count in a statistics table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountEntry {
    pub label: String,
    pub count: usize,
}

/// Count occurrences, most frequent first, ties broken by label.
pub(crate) fn count_by<I, S>(values: I) -> Vec<CountEntry>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let mut counts: BTreeMap<String, usize> = BTreeMap::new();
    for value in values {
        *counts.entry(value.into()).or_default() += 1;
    }
    let mut entries: Vec<CountEntry> = counts
        .into_iter()
        .map(|(label, count)| CountEntry { label, count })
        .collect();
    // BTreeMap order is by label already, a stable sort keeps it on ties.
    entries.sort_by(|a, b| b.count.cmp(&a.count));
    entries
}

pub(crate) fn cluster_name(label: usize) -> String {
    format!("Cluster {label}")
}

/// Every artifact a run can produce.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "view", rename_all = "snake_case")]
pub enum View {
    Scatter(ScatterView),
    Comparison(ComparisonView),
    Statistics(StatisticsView),
    ClusterDetails(ClusterDetailsView),
}

impl View {
    fn suffix(&self) -> String {
        match self {
            View::Scatter(view) => format!("_{}_{}", view.method.label(), view.dims.label()),
            View::Comparison(_) => "_comparison".to_string(),
            View::Statistics(_) => "_stats".to_string(),
            View::ClusterDetails(_) => "_clusters".to_string(),
        }
    }

    fn title(&self) -> String {
        match self {
            View::Scatter(view) => {
                let dims = match view.dims {
                    TargetDims::Two => "",
                    TargetDims::Three => " 3D",
                };
                match view.cluster_count {
                    Some(k) => format!(
                        "Message Clusters{dims} ({} Projection): {k} clusters across {} messages",
                        view.method.title(),
                        view.point_count()
                    ),
                    None => format!("Message Clusters{dims} Visualization ({})", view.method.title()),
                }
            }
            View::Comparison(view) => view.title(),
            View::Statistics(_) => "Message Statistics".to_string(),
            View::ClusterDetails(_) => "Cluster Statistics and Distribution".to_string(),
        }
    }
}

/// One serialized artifact: a view plus the run-level annotations.
#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub title: String,
    /// Set when metadata could not be fetched and every record carries placeholders.
    pub metadata_degraded: bool,
    pub record_count: usize,
    #[serde(flatten)]
    pub view: View,
}

impl Report {
    pub fn new(view: View, record_count: usize, metadata_degraded: bool) -> Self {
        Report {
            title: view.title(),
            metadata_degraded,
            record_count,
            view,
        }
    }

    /// `<dir>/<stem><suffix>.json` for the requested output path.
    pub fn path_for(&self, output: &Path) -> PathBuf {
        let stem = output
            .file_stem()
            .and_then(|s| s.to_str())
            .filter(|s| !s.is_empty())
            .unwrap_or(DEFAULT_STEM);
        let file_name = format!("{stem}{}.json", self.view.suffix());
        match output.parent() {
            Some(parent) => parent.join(file_name),
            None => PathBuf::from(file_name),
        }
    }
}
