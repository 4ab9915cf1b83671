// Reconciliation engine: inputs, desired state, diffing, the registration
// driver and the controller that ties them together.

pub mod desired_state;
pub mod fingerprint;
pub mod outcome;
pub mod params;
pub mod preflight;
pub mod reconciler;
pub mod registration;
pub mod validators;
