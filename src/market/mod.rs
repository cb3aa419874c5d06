//! Congestion pricing and the auction fallback

pub mod auction;
pub mod logging;
pub mod pricing;
pub mod resolver;

pub use auction::{AuctionCoordinator, Bid, BidderOutcome, BidderReport, ExitReason};
pub use pricing::{CongestionPricer, Heatmap, PriceTable, PricingStrategy};
pub use resolver::{CommitOutcome, ConflictResolver, Resolution};
