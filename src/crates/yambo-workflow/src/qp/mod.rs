//! Quasiparticle bookkeeping: band-edge mapping, subset partitioning and the
//! band window handed to BSE

pub mod analyzer;
pub mod mapper;
pub mod subsets;

/// `[k_i, k_f, b_i, b_f]`, 1-based and inclusive, as in `QPkrange`
pub type QpRange = [i64; 4];

/// Ranges computed together in one yambo run
pub type QpSubset = Vec<QpRange>;

pub use analyzer::{BseWindow, QpAnalyzer};
pub use mapper::{band_edges, NscfMapping, QpMapper};
pub use subsets::{qp_list_merger, qp_subset_groups, range_size, BandBoundaries, QpSubsetSpec};
