pub mod openai_client;
pub mod recognition_client;

pub use openai_client::OpenAiRecognitionClient;
pub use recognition_client::{Recognition, RecognitionClient};
