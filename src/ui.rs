//! Saída de terminal: spinners e tabelas coloridas.
//!
//! Usa as crates `indicatif` para spinners de progresso e `console` para
//! estilização com cores. Usado pelos comandos `status` e `demo`.

use console::Style;
use indicatif::{ProgressBar, ProgressStyle};

use crate::router::{Outcome, Response};
use crate::state_machine::{Machine, MachineStatus};

/// Estilos compartilhados para imprimir máquinas e respostas.
pub struct FleetDisplay {
    green: Style,
    red: Style,
    yellow: Style,
    cyan: Style,
    dim: Style,
}

impl Default for FleetDisplay {
    fn default() -> Self {
        Self {
            green: Style::new().green().bold(),
            red: Style::new().red().bold(),
            yellow: Style::new().yellow(),
            cyan: Style::new().cyan(),
            dim: Style::new().dim(),
        }
    }
}

impl FleetDisplay {
    pub fn new() -> Self {
        Self::default()
    }

    fn status_style(&self, status: MachineStatus) -> &Style {
        match status {
            MachineStatus::Available => &self.green,
            MachineStatus::AwaitingDropoff => &self.yellow,
            MachineStatus::Running => &self.cyan,
            MachineStatus::Error => &self.red,
        }
    }

    /// Imprime uma tabela de máquinas, uma por linha.
    pub fn print_machines(&self, machines: &[Machine]) {
        if machines.is_empty() {
            println!("  {}", self.dim.apply_to("(no machines)"));
            return;
        }
        println!(
            "  {:<16} {:<16} {:<18} {}",
            "MACHINE", "LOCATION", "STATUS", "JOB"
        );
        for m in machines {
            // Padding antes de colorir, para não contar os códigos ANSI.
            let status = format!("{:<18}", m.status.to_string());
            println!(
                "  {:<16} {:<16} {} {}",
                m.machine_id,
                m.location_id,
                self.status_style(m.status).apply_to(status),
                m.current_job_id.as_deref().unwrap_or("-"),
            );
        }
    }

    /// Imprime o resultado de uma chamada ao roteador.
    pub fn print_response(&self, label: &str, response: &Response) {
        let marker = match response.outcome {
            Outcome::Ok => self.green.apply_to("✓"),
            Outcome::HardwareError | Outcome::InternalServerError => self.red.apply_to("✗"),
            _ => self.yellow.apply_to("•"),
        };
        println!(
            "  {marker} {label} → {} {:?}",
            response.status_code, response.outcome
        );
        let detail = match response.outcome {
            Outcome::Ok => format!(
                "{} {} job={}",
                response.body["machineId"].as_str().unwrap_or("?"),
                response.body["status"].as_str().unwrap_or("?"),
                response.body["currentJobId"].as_str().unwrap_or("-"),
            ),
            _ => response.body["error"]["message"]
                .as_str()
                .unwrap_or_default()
                .to_string(),
        };
        println!("      {}", self.dim.apply_to(detail));
    }
}

/// Spinner exibido enquanto uma chamada está em andamento.
pub struct Spinner {
    pb: ProgressBar,
}

impl Spinner {
    pub fn start(message: &str) -> Self {
        let pb = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.cyan} {msg}") {
            pb.set_style(style);
        }
        pb.set_message(message.to_string());
        pb.enable_steady_tick(std::time::Duration::from_millis(100));
        Self { pb }
    }

    pub fn finish(self) {
        self.pb.finish_and_clear();
    }
}
