//! # fedconn: private federated averaging of connectivity matrices
//!
//! Several sites each hold per-subject functional connectivity matrices which must never leave
//! the site. `fedconn` estimates the average connectivity matrix across all sites in a single
//! round:
//!
//! 1. the coordinator loads the shared [privacy parameters](privacy::PrivacyParameters) and
//!    broadcasts them to every site,
//! 2. every site clips its observations, averages them and adds Gaussian noise calibrated by the
//!    [analytic Gaussian mechanism](privacy::calibrate) (see [`estimator`]),
//! 3. the coordinator waits for a quorum of contributions, combines them into a subject-weighted
//!    mean and denoises it with a low-rank approximation (see [`aggregator`]),
//! 4. the global aggregate is broadcast back to the sites which persist it.
//!
//! The round itself is driven by the [`state_machine`]. Sites are abstracted behind the
//! [`Site`](sites::Site) trait, with [`LocalSite`](sites::LocalSite) reading its observations from
//! a directory on disk.
//!
//! The `coordinator` binary runs one round over the sites found in a data directory. It is
//! configured with a TOML file, see [`settings`].

pub mod aggregator;
pub mod estimator;
pub mod matrix;
pub mod privacy;
pub mod settings;
pub mod sites;
pub mod state_machine;
