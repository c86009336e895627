//! Configuração do serviço carregada a partir de `fleet.toml`.
//!
//! A struct [`FleetConfig`] contém todos os parâmetros configuráveis.
//! Valores não presentes no arquivo usam defaults sensíveis.
//! As variáveis de ambiente `FLEET_HARDWARE_API_KEY` e `FLEET_AUTH_TOKENS`
//! têm precedência sobre o arquivo.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::Deserialize;

use crate::engine::EngineSettings;

/// Arquivo lido quando nenhum `--config` é passado.
pub const DEFAULT_CONFIG_PATH: &str = "fleet.toml";

/// Configuração de nível superior carregada de `fleet.toml`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FleetConfig {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub auth: AuthConfig,

    #[serde(default)]
    pub hardware: HardwareConfig,

    #[serde(default)]
    pub reservation: ReservationConfig,

    /// Inventário provisionado na inicialização (máquinas já existentes não são alteradas).
    #[serde(default)]
    pub machines: Vec<MachineSeed>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Endereço de escuta do servidor HTTP.
    #[serde(default = "default_bind")]
    pub bind: String,
}

/// Sem `path`, as máquinas vivem só em memória.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StoreConfig {
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CacheConfig {
    /// Tempo de vida de uma entrada do cache. Sem valor, entradas não expiram.
    pub ttl_secs: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    /// Tokens aceitos quando não há serviço de identidade remoto.
    #[serde(default)]
    pub tokens: Vec<String>,

    /// URL base do serviço de identidade. Tem precedência sobre `tokens`.
    pub verifier_url: Option<String>,

    #[serde(default = "default_auth_timeout_ms")]
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HardwareConfig {
    /// URL base do gateway de controle. Sem valor, usa o controlador simulado.
    pub base_url: Option<String>,

    #[serde(default)]
    pub api_key: String,

    /// Prazo máximo de uma chamada de partida; estourar conta como falha.
    #[serde(default = "default_hardware_timeout_ms")]
    pub timeout_ms: u64,

    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReservationConfig {
    /// Tempo máximo que uma reserva segura a máquina sem partida.
    /// Sem valor, reservas nunca expiram.
    pub max_hold_secs: Option<u64>,

    /// Intervalo entre varreduras de reservas expiradas.
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MachineSeed {
    pub machine_id: String,
    pub location_id: String,
}

// Valor padrão para o endereço de escuta: "0.0.0.0:8080".
fn default_bind() -> String {
    "0.0.0.0:8080".to_string()
}

// Valor padrão para o prazo do serviço de identidade: 2000ms.
fn default_auth_timeout_ms() -> u64 {
    2000
}

// Valor padrão para o prazo do hardware: 10000ms.
fn default_hardware_timeout_ms() -> u64 {
    10_000
}

// Valor padrão para o prazo de conexão: 2000ms.
fn default_connect_timeout_ms() -> u64 {
    2000
}

// Valor padrão para o intervalo de varredura: 60s.
fn default_sweep_interval_secs() -> u64 {
    60
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            tokens: Vec::new(),
            verifier_url: None,
            timeout_ms: default_auth_timeout_ms(),
        }
    }
}

impl Default for HardwareConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            api_key: String::new(),
            timeout_ms: default_hardware_timeout_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
        }
    }
}

impl Default for ReservationConfig {
    fn default() -> Self {
        Self {
            max_hold_secs: None,
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

impl FleetConfig {
    /// Carrega a configuração de `path`.
    /// Usa valores padrão se o arquivo não existir.
    pub fn load_from(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            toml::from_str::<FleetConfig>(&contents)
                .with_context(|| format!("failed to parse {}", path.display()))?
        } else {
            Self::default()
        };

        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Rejeita valores que não cabem nos tipos usados pelo motor.
    fn validate(&self) -> Result<()> {
        let hold = self.reservation.max_hold_secs;
        if let Some(secs) = hold.filter(|secs| max_hold(*secs).is_none()) {
            bail!("reservation.max_hold_secs is out of range: {secs}");
        }
        Ok(())
    }

    /// Variáveis de ambiente têm precedência sobre o arquivo de configuração.
    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(key) = lookup("FLEET_HARDWARE_API_KEY").filter(|k| !k.is_empty()) {
            self.hardware.api_key = key;
        }

        if let Some(tokens) = lookup("FLEET_AUTH_TOKENS") {
            let tokens: Vec<String> = tokens
                .split(',')
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(str::to_string)
                .collect();
            if !tokens.is_empty() {
                self.auth.tokens = tokens;
            }
        }
    }

    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            hardware_timeout: Duration::from_millis(self.hardware.timeout_ms),
            max_hold: self
                .reservation
                .max_hold_secs
                .and_then(max_hold),
        }
    }
}

fn max_hold(secs: u64) -> Option<chrono::Duration> {
    i64::try_from(secs).ok().and_then(chrono::Duration::try_seconds)
}
