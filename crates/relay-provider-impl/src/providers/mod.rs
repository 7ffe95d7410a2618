mod url;

mod azure_openai;
mod bedrock;
mod claude_console;
mod claude_official;
mod droid;
mod gemini;
mod gemini_api;
mod openai;
mod openai_responses;

pub use azure_openai::AzureOpenAiProvider;
pub use bedrock::BedrockProvider;
pub use claude_console::ClaudeConsoleProvider;
pub use claude_official::ClaudeOfficialProvider;
pub use droid::DroidProvider;
pub use gemini::GeminiProvider;
pub use gemini_api::GeminiApiProvider;
pub use openai::OpenAiProvider;
pub use openai_responses::OpenAiResponsesProvider;
