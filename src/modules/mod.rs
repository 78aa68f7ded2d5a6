pub mod assignments;
pub mod joining_forms;
pub mod question_papers;
pub mod training_videos;
