//! Falhas ao comandar o hardware de uma máquina.
//!
//! Toda variante de [`HardwareError`] é terminal para a tentativa de partida:
//! o motor marca a máquina como `ERROR` e não tenta de novo.

use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum HardwareError {
    /// O controlador respondeu, mas recusou o comando (4xx/5xx).
    #[error("controller rejected start (status {status}): {message}")]
    Rejected { status: u16, message: String },

    /// Nenhuma resposta dentro do prazo. O resultado real é desconhecido.
    #[error("controller did not answer within {after_ms}ms")]
    Timeout { after_ms: u64 },

    /// Falha de rede subjacente (DNS, conexão recusada).
    #[error("controller unreachable: {0}")]
    Transport(#[from] reqwest::Error),

    /// A unidade está fora de serviço (usado pelo controlador simulado).
    #[error("machine {0} is offline")]
    Offline(String),
}

impl HardwareError {
    /// Timeout após `after`; prazos acima de `u64::MAX` ms saturam.
    pub fn timed_out(after: Duration) -> Self {
        HardwareError::Timeout {
            after_ms: u64::try_from(after.as_millis()).unwrap_or(u64::MAX),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejected_display() {
        let err = HardwareError::Rejected {
            status: 503,
            message: "door open".into(),
        };
        assert_eq!(
            err.to_string(),
            "controller rejected start (status 503): door open"
        );
    }

    #[test]
    fn timeout_display() {
        let err = HardwareError::Timeout { after_ms: 5000 };
        assert_eq!(err.to_string(), "controller did not answer within 5000ms");
    }

    #[test]
    fn timed_out_saturates_instead_of_wrapping() {
        assert!(matches!(
            HardwareError::timed_out(Duration::from_millis(250)),
            HardwareError::Timeout { after_ms: 250 }
        ));
        assert!(matches!(
            HardwareError::timed_out(Duration::MAX),
            HardwareError::Timeout { after_ms: u64::MAX }
        ));
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<HardwareError>();
    }
}
