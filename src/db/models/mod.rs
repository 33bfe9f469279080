mod llm;
mod user;

pub use llm::Llm;
pub use user::GitHubUser;
