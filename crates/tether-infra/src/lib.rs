//! Tether Infra - cloud wiring of intercepted functions
//!
//! Provides:
//! - The [`CloudApi`] seam over the provider's management API
//! - Pure wiring rules ([`wiring`]): bridge layer, injected environment,
//!   timeout floor, wrapper chaining, broker policy
//! - [`Reconciler`]: `plan_add` / `plan_remove` produce an [`InfraChangeSet`],
//!   `apply` executes it and returns an [`ApplyReport`]; `purge_layer`
//!   deletes every bridge layer version
//!
//! # Example
//!
//! ```rust,ignore
//! use tether_infra::prelude::*;
//!
//! let reconciler = Reconciler::new(api, catalog, ReconcileSettings::from_config(&config, &session));
//! let plan = reconciler.plan_add().await?;
//! let report = reconciler.apply(&plan).await;
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod api;
pub mod error;
pub mod plan;
pub mod reconciler;
pub mod wiring;

pub use api::{
    CloudApi, FunctionConfiguration, FunctionUpdate, LayerPage, LayerVersion, PublishLayerRequest,
};
pub use error::ReconcileError;
pub use plan::{ApplyReport, FunctionChange, InfraChangeSet, LayerPlan, Target, TargetFailure};
pub use reconciler::{ReconcileSettings, Reconciler};
pub use wiring::{WiringSettings, LAYER_NAME, POLICY_NAME, WRAPPER_SCRIPT};

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for working with the reconciler
    pub use crate::{
        ApplyReport, CloudApi, InfraChangeSet, ReconcileError, ReconcileSettings, Reconciler,
    };
}
