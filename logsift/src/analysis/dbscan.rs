// logsift/src/analysis/dbscan.rs
//
// DBSCAN over a single dimension: record timestamps.
//
//   neighbours    |t_i − t_j| ≤ epsilon
//   core          at least min_density neighbours, itself included
//   cluster       transitive closure of core-neighbour relations
//   noise         everything else; never reported
//
// After sorting, every neighbourhood is a contiguous window, so a cluster is
// the union of overlapping core windows. Windows that share only a border
// record are merged. Union-find keeps the bookkeeping honest without an
// explicit graph walk.

use chrono::{DateTime, Duration, Utc};
use petgraph::unionfind::UnionFind;

use crate::config::ClusteringDbScanConf;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cluster {
    /// Input indices, ordered by (time, input index).
    pub members:        Vec<usize>,
    /// Earliest member; ties go to the lower input index.
    pub representative: usize,
}

impl Cluster {
    pub fn size(&self) -> usize {
        self.members.len()
    }
}

pub fn epsilon_duration(epsilon_secs: f64) -> Duration {
    Duration::microseconds((epsilon_secs * 1_000_000.0).round() as i64)
}

/// Cluster `times` (given in insertion order). Clusters come back ordered by
/// their representative's time.
pub fn cluster_by_time(times: &[DateTime<Utc>], conf: &ClusteringDbScanConf) -> Vec<Cluster> {
    let n = times.len();
    if n == 0 || conf.min_density == 0 {
        return Vec::new();
    }
    let eps = epsilon_duration(conf.epsilon);

    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by_key(|&i| (times[i], i));
    let t = |p: usize| times[order[p]];

    let mut uf       = UnionFind::<usize>::new(n);
    let mut covered  = vec![false; n];
    let mut lo       = 0usize;
    let mut hi       = 0usize;
    let mut joined: Option<usize> = None; // right edge of the last core window

    for p in 0..n {
        while t(p) - t(lo) > eps {
            lo += 1;
        }
        if hi < p {
            hi = p;
        }
        while hi + 1 < n && t(hi + 1) - t(p) <= eps {
            hi += 1;
        }
        if hi - lo + 1 < conf.min_density {
            continue;
        }
        let start = match joined {
            Some(j) if j >= lo => j,
            _                  => lo,
        };
        for q in start..hi {
            uf.union(q, q + 1);
        }
        covered[start..=hi].iter_mut().for_each(|c| *c = true);
        joined = Some(hi);
    }

    let mut clusters: Vec<Cluster> = Vec::new();
    for p in 0..n {
        if !covered[p] {
            continue;
        }
        let continues = p > 0 && covered[p - 1] && uf.equiv(p - 1, p);
        match clusters.last_mut() {
            Some(c) if continues => c.members.push(order[p]),
            _ => clusters.push(Cluster { members: vec![order[p]], representative: order[p] }),
        }
    }
    clusters
}
