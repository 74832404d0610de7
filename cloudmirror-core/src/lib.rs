mod listing;

pub use listing::{
    ClassificationParseError, ListingClassification, ListingPage, RemoteListingEntry, RemoteLock,
};
