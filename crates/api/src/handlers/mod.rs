pub mod jobs;
pub mod projects;
