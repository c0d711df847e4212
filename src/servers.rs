//! Model-serving backends the `serve` mode can launch.

use std::fmt;
use std::str::FromStr;

/// A serving backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServerType {
    /// Local LLM runtime.
    Ollama,
    /// OpenAI-compatible server, run from its container image.
    Vllm,
    /// llama.cpp's `llama-server`.
    LlamaCpp,
}

impl ServerType {
    pub const ALL: [ServerType; 3] = [ServerType::Ollama, ServerType::Vllm, ServerType::LlamaCpp];

    pub fn as_str(&self) -> &'static str {
        match self {
            ServerType::Ollama => "ollama",
            ServerType::Vllm => "vllm",
            ServerType::LlamaCpp => "llama.cpp",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ServerType::Ollama => "Ollama (local runtime)",
            ServerType::Vllm => "vLLM (OpenAI-compatible, docker)",
            ServerType::LlamaCpp => "llama.cpp server",
        }
    }

    /// Port the backend listens on when nothing else is configured.
    pub fn standard_port(&self) -> u16 {
        match self {
            ServerType::Ollama => 11434,
            ServerType::Vllm => 8000,
            ServerType::LlamaCpp => 8080,
        }
    }

    pub fn default_model(&self) -> &'static str {
        match self {
            ServerType::Ollama => "llama3.2:1b",
            ServerType::Vllm => "Qwen/Qwen2.5-0.5B-Instruct",
            ServerType::LlamaCpp => "ggml-org/gemma-3-1b-it-GGUF",
        }
    }

    /// Fully qualified model name as the backend reports it.
    pub fn full_model_name(&self, model: &str) -> String {
        match self {
            ServerType::Ollama if !model.contains(':') => format!("{}:latest", model),
            _ => model.to_string(),
        }
    }
}

impl fmt::Display for ServerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ServerType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ollama" => Ok(ServerType::Ollama),
            "vllm" => Ok(ServerType::Vllm),
            "llama.cpp" | "llamacpp" | "llama-cpp" => Ok(ServerType::LlamaCpp),
            other => Err(format!(
                "Unknown server '{}'. Available: ollama, vllm, llama.cpp",
                other
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_aliases() {
        assert_eq!("llamacpp".parse::<ServerType>(), Ok(ServerType::LlamaCpp));
        assert_eq!("VLLM".parse::<ServerType>(), Ok(ServerType::Vllm));
        assert!("tgi".parse::<ServerType>().is_err());
    }

    #[test]
    fn test_ollama_full_model_name() {
        assert_eq!(ServerType::Ollama.full_model_name("llama3.2"), "llama3.2:latest");
        assert_eq!(ServerType::Ollama.full_model_name("llama3.2:1b"), "llama3.2:1b");
        assert_eq!(ServerType::Vllm.full_model_name("Qwen/Qwen2.5"), "Qwen/Qwen2.5");
    }
}
