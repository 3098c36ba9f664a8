pub mod assessments;
pub mod attendance;
pub mod backup;
pub mod bulletin;
pub mod classes;
pub mod core;
pub mod fees;
pub mod lessons;
pub mod messages;
pub mod parents;
pub mod results;
pub mod students;
pub mod subjects;
pub mod teachers;
