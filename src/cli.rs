//! Interface de linha de comando baseada em clap.
//!
//! Define a struct [`Cli`] com subcomandos [`Command`] (serve, status, reset, demo)
//! e flags globais (--config, --verbose).

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::config::DEFAULT_CONFIG_PATH;

/// Reserva e partida remota de máquinas de lavanderia compartilhadas.
#[derive(Debug, Parser)]
#[command(name = "laundry-fleet", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Caminho para o arquivo de configuração TOML.
    #[arg(long, short, global = true, default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,

    /// Habilita saída detalhada (verbose).
    #[arg(long, short, global = true, default_value_t = false)]
    pub verbose: bool,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Inicia o servidor HTTP.
    Serve {
        /// Endereço de escuta; sobrescreve `server.bind` do arquivo.
        #[arg(long)]
        bind: Option<String>,
    },

    /// Mostra o estado das máquinas no armazenamento configurado.
    Status {
        /// Filtra por local.
        #[arg(long)]
        location: Option<String>,
    },

    /// Devolve manualmente uma máquina em ERROR ou AWAITING_DROPOFF ao estado AVAILABLE.
    ///
    /// Exige `store.path`. O servidor deve estar parado: ele mantém sua própria
    /// cópia em memória do arquivo e sobrescreveria a alteração no próximo commit.
    Reset {
        /// Identificador da máquina.
        machine_id: String,
    },

    /// Executa a demonstração embutida do fluxo de reserva e partida.
    Demo,
}
