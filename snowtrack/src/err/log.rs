use super::Error;

// Print to the log back end. Errors are never persisted.
pub fn log_err(err: Error) {
    match err {
        Error::Bus(e) => error!("bus: {:?}", e),
        Error::Frame(e) => error!("frame: {:?}", e),
        Error::Open(e) => error!("hub open: {:?}", e),
        Error::Decode(e) => error!("decode: {:?}", e),
        Error::Acquisition(e) => error!("acquisition: {:?}", e),
        Error::Link(e) => error!("link: {:?}", e),
    }
}
