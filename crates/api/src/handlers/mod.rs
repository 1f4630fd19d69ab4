pub mod jobs;
pub mod results;
pub mod status;
