//! Interface de linha de comando do greenloop baseada em clap.
//!
//! Define a struct [`Cli`] com subcomandos [`Command`] (run, step, status)
//! e flags globais (--config, --verbose).

use clap::{Parser, Subcommand};

/// greenloop — mantém um backlog de cenários em loop até ficar verde.
#[derive(Debug, Parser)]
#[command(name = "greenloop", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Caminho do arquivo de configuração (padrão: greenloop.toml).
    #[arg(long, global = true)]
    pub config: Option<String>,

    /// Habilita saída detalhada (verbose).
    #[arg(long, short, global = true, default_value_t = false)]
    pub verbose: bool,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Executa ciclos de avaliação continuamente até o backlog esgotar.
    Run,

    /// Executa um único ciclo de avaliação e sai (para cron/webhook).
    Step,

    /// Mostra os itens abertos, o gasto das janelas e o backlog restante.
    Status,
}
