//! Interface de terminal do greenloop — spinners e saída colorida.
//!
//! Usa as crates `indicatif` para o spinner do modo contínuo e `console`
//! para estilização com cores. O [`CycleProgress`] acompanha visualmente
//! os ciclos de avaliação no terminal.

use console::Style;
use indicatif::{ProgressBar, ProgressStyle};

use crate::orchestrator::{CycleOutcome, StatusReport};
use crate::state_machine::ItemState;

/// Indicador visual de progresso para o modo contínuo no terminal.
///
/// Exibe um spinner animado entre os ciclos e mensagens coloridas para
/// merge (verde), item estacionado ou orçamento bloqueado (vermelho) e
/// espera por agente (amarelo).
pub struct CycleProgress {
    // Barra de progresso/spinner do indicatif.
    pb: ProgressBar,
    // Estilo verde para mensagens de sucesso.
    green: Style,
    // Estilo vermelho para falhas e bloqueios.
    red: Style,
    // Estilo amarelo para avisos e espera.
    yellow: Style,
}

impl CycleProgress {
    /// Inicia o spinner com a mensagem inicial e retorna a instância.
    pub fn start(message: &str) -> Self {
        let pb = ProgressBar::new_spinner();
        pb.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.cyan} {msg}")
                .expect("invalid template"),
        );
        pb.set_message(message.to_string());
        pb.enable_steady_tick(std::time::Duration::from_millis(100));

        Self {
            pb,
            green: Style::new().green().bold(),
            red: Style::new().red().bold(),
            yellow: Style::new().yellow(),
        }
    }

    /// Registra o resultado de um ciclo sem parar o spinner.
    pub fn cycle(&self, outcome: &CycleOutcome) {
        let line = match outcome {
            CycleOutcome::Merged { .. } => {
                format!("  {} {outcome}", self.green.apply_to("✓"))
            }
            CycleOutcome::Parked { .. } | CycleOutcome::Denied(_) => {
                format!("  {} {outcome}", self.red.apply_to("✗"))
            }
            CycleOutcome::Waiting { .. } => {
                format!("  {} {outcome}", self.yellow.apply_to("…"))
            }
            _ => format!("    {outcome}"),
        };
        self.pb.println(line);
    }

    /// Exibe um aviso amarelo (ex.: avisos do governador de custo).
    pub fn note(&self, text: &str) {
        self.pb
            .println(format!("  {} {text}", self.yellow.apply_to("!")));
    }

    /// Finaliza o spinner e exibe a mensagem de encerramento.
    pub fn finish(&self, message: &str) {
        self.pb.finish_and_clear();
        println!("{message}");
    }
}

/// Imprime o relatório de status formatado com cores.
pub fn print_status(report: &StatusReport) {
    let green = Style::new().green().bold();
    let red = Style::new().red().bold();
    let yellow = Style::new().yellow();
    let bold = Style::new().bold();

    println!("{}", bold.apply_to("─── greenloop status ───"));

    if report.items.is_empty() {
        println!("  no open managed items");
    }
    for item in &report.items {
        let style = match item.state {
            ItemState::Merged => &green,
            ItemState::ManualIntervention | ItemState::MergeConflict => &red,
            _ => &yellow,
        };
        let failure = item
            .last_failure
            .map(|kind| format!(" [{kind}]"))
            .unwrap_or_default();
        println!(
            "  #{} {} {} ({}){}",
            item.number,
            item.spec_id,
            style.apply_to(item.state),
            item.attempt_token(),
            failure,
        );
    }

    let spend_style = if !report.cost.can_proceed {
        &red
    } else if report.cost.warnings.is_empty() {
        &green
    } else {
        &yellow
    };
    println!(
        "  spend: {}",
        spend_style.apply_to(format!(
            "daily ${:.2}/${:.2}, weekly ${:.2}/${:.2}",
            report.cost.daily_spend,
            report.daily_limit_usd,
            report.cost.weekly_spend,
            report.weekly_limit_usd,
        ))
    );
    for warning in &report.cost.warnings {
        println!("  {} {warning}", yellow.apply_to("!"));
    }

    if report.phantom_runs > 0 {
        println!(
            "  {} {} stuck execution record(s) past the staleness window",
            yellow.apply_to("!"),
            report.phantom_runs,
        );
    }

    println!(
        "  backlog: {} entries, {} startable, {} blocked",
        report.backlog_total, report.backlog_startable, report.backlog_blocked,
    );
}
