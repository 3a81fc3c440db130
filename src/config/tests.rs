use super::*;
use std::fs;
use tempfile::TempDir;

#[cfg(test)]
mod integration_tests {
    use super::*;

    #[test]
    fn config_file_persistence() {
        let temp_dir = TempDir::new().expect("should create TempDir successfully");

        let original_config = Config {
            ollama: OllamaConfig {
                protocol: "https".to_string(),
                host: "test-host".to_string(),
                port: 8080,
                embedding_model: "test-model".to_string(),
                embedding_dimension: 384,
                batch_size: 32,
                timeout_seconds: 10,
            },
            generation: GenerationConfig {
                project_name: "Handbook".to_string(),
                ..GenerationConfig::default()
            },
            retrieval: RetrievalConfig { top_k: 6 },
            base_dir: temp_dir.path().to_path_buf(),
            ..Config::default()
        };
        original_config.save().expect("should save config");

        let content = fs::read_to_string(original_config.config_file_path())
            .expect("should read from config_path successfully");
        assert!(content.contains("[generation]"));
        assert!(content.contains("project_name = \"Handbook\""));

        let loaded_config = Config::load(temp_dir.path()).expect("should load config");
        assert_eq!(original_config, loaded_config);
    }

    #[test]
    fn invalid_toml_handling() {
        let invalid_toml = r#"
            [ollama
            host = "localhost"
            port = "invalid_port"
        "#;

        let result: Result<Config, toml::de::Error> = toml::from_str(invalid_toml);
        assert!(result.is_err());
    }

    #[test]
    fn wrong_value_type_is_rejected() {
        let toml = r#"
            [ollama]
            port = "eleven"
        "#;

        let result: Result<Config, toml::de::Error> = toml::from_str(toml);
        assert!(result.is_err());
    }

    #[test]
    fn config_validation_edge_cases() {
        let config = Config {
            ollama: OllamaConfig {
                host: String::new(),
                port: 80,
                ..OllamaConfig::default()
            },
            ..Config::default()
        };

        assert!(config.validate().is_err());
    }

    #[test]
    fn boundary_validation() {
        let mut config = OllamaConfig::default();

        assert!(config.set_port(1).is_ok());
        assert!(config.set_port(65535).is_ok());
        assert!(config.set_batch_size(1).is_ok());
        assert!(config.set_batch_size(1000).is_ok());
        assert!(config.set_embedding_dimension(64).is_ok());
        assert!(config.set_embedding_dimension(4096).is_ok());
        assert!(config.set_embedding_dimension(63).is_err());
        assert!(config.set_timeout_seconds(600).is_ok());
        assert!(config.set_timeout_seconds(601).is_err());
    }

    #[test]
    fn ollama_url_generation_with_different_hosts() {
        let configs = vec![
            ("http", "localhost", 11434, "http://localhost:11434/"),
            ("http", "127.0.0.1", 8080, "http://127.0.0.1:8080/"),
            ("http", "example.com", 3000, "http://example.com:3000/"),
            (
                "https",
                "secure.example.com",
                443,
                "https://secure.example.com/",
            ),
        ];

        for (protocol, host, port, expected_url) in configs {
            let config = OllamaConfig {
                protocol: protocol.to_string(),
                host: host.to_string(),
                port,
                ..OllamaConfig::default()
            };

            let url = config.ollama_url().expect("ollama_url is ok");
            assert_eq!(url.as_str(), expected_url);
        }
    }

    #[test]
    fn error_display_messages() {
        let errors = vec![
            ConfigError::InvalidProtocol("ftp".to_string()),
            ConfigError::InvalidPort(0),
            ConfigError::InvalidBatchSize(0),
            ConfigError::InvalidModel(String::new()),
            ConfigError::InvalidUrl("invalid-url".to_string()),
            ConfigError::InvalidTopK(0),
            ConfigError::OverlapTooLarge(10, 5),
        ];

        for error in errors {
            let message = format!("{error}");
            assert!(message.len() > 10);
        }
    }
}
