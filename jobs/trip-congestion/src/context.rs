use crate::graph::{NodeId, RoadGraph};
use crate::record::{Point, TIMESTAMP_FORMAT};
use chrono::{Datelike, NaiveDateTime};
use rstar::{PointDistance, RTree, RTreeObject, AABB};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

/// Any failure here is fatal: the job cannot run without its full routing
/// context, and there is no partial-capability mode.
#[derive(Debug, Error)]
pub enum ContextError {
    #[error("failed to load {path}: {source}")]
    Resource {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
    #[error("edge resource {path} contains no edges")]
    EmptyGraph { path: PathBuf },
    #[error("node resource {path} contains no nodes")]
    EmptyIndex { path: PathBuf },
    #[error("date filter {path} is missing its bounds row")]
    MissingWindow { path: PathBuf },
    #[error("invalid timestamp {value:?} in {path}")]
    BadTimestamp { path: PathBuf, value: String },
    #[error("date filter {path} has start after end")]
    InvertedWindow { path: PathBuf },
}

#[derive(Clone, Debug)]
pub struct ContextPaths {
    /// Edge list CSV: `from,to,minutes`.
    pub edges: PathBuf,
    /// Node coordinates CSV: `id,lat,lon`.
    pub nodes: PathBuf,
    /// Single headerless CSV row with the window bounds: `start,end`.
    pub date_filter: PathBuf,
}

/// Calendar span trips must fall in, compared on month/day/time with the
/// trip's year normalized to the window's reference year. The window is
/// expected to lie within a single year.
#[derive(Clone, Debug, PartialEq)]
pub struct DateWindow {
    start: NaiveDateTime,
    end: NaiveDateTime,
}

impl DateWindow {
    pub fn new(start: NaiveDateTime, end: NaiveDateTime) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, t: NaiveDateTime) -> bool {
        match t.with_year(self.start.year()) {
            Some(normalized) => self.start <= normalized && normalized <= self.end,
            None => false,
        }
    }
}

#[derive(Clone, Debug)]
struct IndexedNode {
    id: NodeId,
    position: [f64; 2],
}

impl RTreeObject for IndexedNode {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_point(self.position)
    }
}

impl PointDistance for IndexedNode {
    fn distance_2(&self, point: &[f64; 2]) -> f64 {
        let dx = self.position[0] - point[0];
        let dy = self.position[1] - point[1];
        dx * dx + dy * dy
    }
}

/// Spatial index over graph nodes for snapping raw coordinates to the network.
#[derive(Debug)]
pub struct NodeIndex {
    tree: RTree<IndexedNode>,
}

impl NodeIndex {
    pub fn from_nodes(nodes: impl IntoIterator<Item = (NodeId, Point)>) -> Self {
        let entries = nodes
            .into_iter()
            .map(|(id, p)| IndexedNode {
                id,
                position: [p.lon, p.lat],
            })
            .collect();
        Self {
            tree: RTree::bulk_load(entries),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.tree.size() == 0
    }

    pub fn nearest(&self, point: Point) -> Option<NodeId> {
        self.tree
            .nearest_neighbor(&[point.lon, point.lat])
            .map(|n| n.id)
    }
}

#[derive(Debug, Deserialize)]
struct EdgeRow {
    from: NodeId,
    to: NodeId,
    minutes: f64,
}

#[derive(Debug, Deserialize)]
struct NodeRow {
    id: NodeId,
    lat: f64,
    lon: f64,
}

/// Read-only routing context loaded once per worker before any record is
/// processed, then shared by every map task.
#[derive(Debug)]
pub struct RoutingContext {
    pub graph: RoadGraph,
    pub nodes: NodeIndex,
    pub window: DateWindow,
}

impl RoutingContext {
    pub fn load(paths: &ContextPaths) -> Result<Self, ContextError> {
        let graph = load_graph(&paths.edges)?;
        let nodes = load_node_index(&paths.nodes)?;
        let window = load_date_window(&paths.date_filter)?;
        info!(
            edges = %paths.edges.display(),
            nodes = %paths.nodes.display(),
            date_filter = %paths.date_filter.display(),
            "routing context loaded"
        );
        Ok(Self {
            graph,
            nodes,
            window,
        })
    }
}

fn load_graph(path: &Path) -> Result<RoadGraph, ContextError> {
    let mut reader = csv::Reader::from_path(path).map_err(|source| ContextError::Resource {
        path: path.to_path_buf(),
        source,
    })?;
    let mut graph = RoadGraph::new();
    for row in reader.deserialize::<EdgeRow>() {
        let row = row.map_err(|source| ContextError::Resource {
            path: path.to_path_buf(),
            source,
        })?;
        graph.add_edge(row.from, row.to, row.minutes);
    }
    if graph.is_empty() {
        return Err(ContextError::EmptyGraph {
            path: path.to_path_buf(),
        });
    }
    Ok(graph)
}

fn load_node_index(path: &Path) -> Result<NodeIndex, ContextError> {
    let mut reader = csv::Reader::from_path(path).map_err(|source| ContextError::Resource {
        path: path.to_path_buf(),
        source,
    })?;
    let mut nodes = Vec::new();
    for row in reader.deserialize::<NodeRow>() {
        let row = row.map_err(|source| ContextError::Resource {
            path: path.to_path_buf(),
            source,
        })?;
        nodes.push((
            row.id,
            Point {
                lat: row.lat,
                lon: row.lon,
            },
        ));
    }
    let index = NodeIndex::from_nodes(nodes);
    if index.is_empty() {
        return Err(ContextError::EmptyIndex {
            path: path.to_path_buf(),
        });
    }
    Ok(index)
}

fn load_date_window(path: &Path) -> Result<DateWindow, ContextError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .from_path(path)
        .map_err(|source| ContextError::Resource {
            path: path.to_path_buf(),
            source,
        })?;
    let mut records = reader.records();
    let row = records
        .next()
        .ok_or_else(|| ContextError::MissingWindow {
            path: path.to_path_buf(),
        })?
        .map_err(|source| ContextError::Resource {
            path: path.to_path_buf(),
            source,
        })?;
    let (start_field, end_field) = match (row.get(0), row.get(1)) {
        (Some(s), Some(e)) => (s.to_string(), e.to_string()),
        _ => {
            return Err(ContextError::MissingWindow {
                path: path.to_path_buf(),
            })
        }
    };
    let start = parse_bound(path, &start_field)?;
    let end = parse_bound(path, &end_field)?;
    if start > end {
        return Err(ContextError::InvertedWindow {
            path: path.to_path_buf(),
        });
    }
    Ok(DateWindow::new(start, end))
}

fn parse_bound(path: &Path, value: &str) -> Result<NaiveDateTime, ContextError> {
    NaiveDateTime::parse_from_str(value.trim(), TIMESTAMP_FORMAT).map_err(|_| {
        ContextError::BadTimestamp {
            path: path.to_path_buf(),
            value: value.to_string(),
        }
    })
}
