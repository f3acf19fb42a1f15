use crate::context::RoutingContext;
use crate::graph::NodeId;
use crate::record::Point;
use std::sync::Arc;

/// One leg of a resolved trip: an ordered node sequence and the traversal
/// time the network implies for it.
#[derive(Clone, Debug, PartialEq)]
pub struct ResolvedRoute {
    pub nodes: Vec<NodeId>,
    pub ideal_minutes: f64,
}

/// Routing boundary: given raw pickup/dropoff coordinates, produce the legs
/// of the best route between them. An empty result means no route was found
/// and the trip contributes nothing.
pub trait PathResolver: Send + Sync {
    fn resolve(&self, pickup: Point, dropoff: Point) -> Vec<ResolvedRoute>;
}

/// Resolver backed by the loaded routing context: snaps both coordinates to
/// their nearest network nodes, runs the travel-time shortest path between
/// them, and returns one leg per traversed edge.
pub struct ContextResolver {
    ctx: Arc<RoutingContext>,
}

impl ContextResolver {
    pub fn new(ctx: Arc<RoutingContext>) -> Self {
        Self { ctx }
    }
}

impl PathResolver for ContextResolver {
    fn resolve(&self, pickup: Point, dropoff: Point) -> Vec<ResolvedRoute> {
        let Some(src) = self.ctx.nodes.nearest(pickup) else {
            return Vec::new();
        };
        let Some(dst) = self.ctx.nodes.nearest(dropoff) else {
            return Vec::new();
        };
        let Some(path) = self.ctx.graph.shortest_path(src, dst) else {
            return Vec::new();
        };
        path.windows(2)
            .filter_map(|pair| {
                self.ctx
                    .graph
                    .edge_minutes(pair[0], pair[1])
                    .map(|ideal_minutes| ResolvedRoute {
                        nodes: vec![pair[0], pair[1]],
                        ideal_minutes,
                    })
            })
            .collect()
    }
}
