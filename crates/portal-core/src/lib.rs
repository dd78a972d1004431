pub mod access;
pub mod admin;
pub mod upload;
pub mod viewer;

pub use access::{generate_slug, hash_access_password, verify_access_password};
pub use admin::{CaseAdmin, CasePage, PAGE_SIZE};
pub use upload::{
    FixedPlacement, PlacementDecision, PlacementDriver, UploadError, UploadOrchestrator,
    UploadOutcome, UploadReceipt, UploadRequest, UploadStage, ValidationError,
};
pub use viewer::{
    AccessError, GeoLocation, GeoLookup, IpApiLookup, NoGeoLookup, ViewerPage, ViewerService,
    Visitor,
};
