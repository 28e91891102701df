pub mod ad;
pub mod checks;
pub mod functions;
