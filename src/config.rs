//! Configuração do greenloop carregada a partir de `greenloop.toml`.
//!
//! A struct [`GreenloopConfig`] contém todos os parâmetros configuráveis.
//! Valores não presentes no arquivo usam defaults sensíveis.
//! A variável de ambiente `GREENLOOP_TOKEN` tem precedência sobre o arquivo.

use anyhow::Result;
use serde::Deserialize;
use std::path::Path;

use crate::cost::CostLimits;

/// Configuração de nível superior carregada de `greenloop.toml`.
#[derive(Debug, Clone, Deserialize)]
pub struct GreenloopConfig {
    /// Token de autenticação usado no hub e no substrato de agentes.
    #[serde(default)]
    pub token: String,

    /// URL base da API do hub de issues.
    #[serde(default = "default_hub_base_url")]
    pub hub_base_url: String,

    /// URL base do substrato de execução de agentes.
    #[serde(default = "default_agent_base_url")]
    pub agent_base_url: String,

    /// Caminho do manifesto de backlog.
    #[serde(default = "default_backlog_path")]
    pub backlog_path: String,

    /// Diretório do checkout usado para sincronização e verificação.
    #[serde(default = "default_workdir")]
    pub workdir: String,

    /// Branch base contra a qual as branches de trabalho são sincronizadas.
    #[serde(default = "default_base_branch")]
    pub base_branch: String,

    /// Máximo de tentativas de implementação antes de exigir intervenção manual.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Timeout em minutos para uma sessão de agente ou verificação.
    #[serde(default = "default_timeout_minutes")]
    pub timeout_minutes: u32,

    /// Janela em minutos após a qual um registro de execução sem atualização
    /// é tratado como fantasma.
    #[serde(default = "default_staleness_minutes")]
    pub staleness_minutes: u32,

    /// Intervalo em minutos entre ciclos de avaliação no modo contínuo.
    #[serde(default = "default_cadence_minutes")]
    pub cadence_minutes: u32,

    /// Sincroniza automaticamente a branch de trabalho com a base antes de
    /// verificar. Desligado, uma branch atrasada é reportada como pendente
    /// de sincronização em vez de mesclada no ato.
    #[serde(default = "default_auto_sync")]
    pub auto_sync: bool,

    /// Comando de verificação de qualidade (lint, typecheck).
    #[serde(default = "default_quality_command")]
    pub quality_command: String,

    /// Comando de verificação funcional (suíte de testes).
    #[serde(default = "default_functional_command")]
    pub functional_command: String,

    /// Limite de gasto em USD na janela de 24 horas.
    #[serde(default = "default_daily_limit_usd")]
    pub daily_limit_usd: f64,

    /// Limite de gasto em USD na janela de 7 dias.
    #[serde(default = "default_weekly_limit_usd")]
    pub weekly_limit_usd: f64,

    /// Custo substituto em USD quando nenhum extrator resolve o custo real.
    #[serde(default = "default_fallback_cost_usd")]
    pub fallback_cost_usd: f64,

    /// Orçamento máximo em USD para uma única invocação de agente.
    #[serde(default = "default_invocation_budget_usd")]
    pub invocation_budget_usd: f64,
}

// Valor padrão para a URL do hub: instância local.
fn default_hub_base_url() -> String {
    "http://localhost:3000/api".to_string()
}

// Valor padrão para a URL do substrato de agentes: instância local.
fn default_agent_base_url() -> String {
    "http://localhost:3100".to_string()
}

// Valor padrão para o manifesto de backlog.
fn default_backlog_path() -> String {
    "backlog.json".to_string()
}

// Valor padrão para o diretório de trabalho: diretório atual.
fn default_workdir() -> String {
    ".".to_string()
}

// Valor padrão para a branch base: "main".
fn default_base_branch() -> String {
    "main".to_string()
}

// Valor padrão para tentativas máximas: 5.
fn default_max_attempts() -> u32 {
    5
}

// Valor padrão para o timeout: 30 minutos.
fn default_timeout_minutes() -> u32 {
    30
}

// Valor padrão para a janela de staleness: 30 minutos.
fn default_staleness_minutes() -> u32 {
    crate::staleness::DEFAULT_THRESHOLD_MINUTES
}

// Valor padrão para a cadência do modo contínuo: 10 minutos.
fn default_cadence_minutes() -> u32 {
    10
}

// Sincronização automática ligada por padrão.
fn default_auto_sync() -> bool {
    true
}

// Valor padrão para o comando de qualidade.
fn default_quality_command() -> String {
    "npm run lint && npm run typecheck".to_string()
}

// Valor padrão para o comando funcional.
fn default_functional_command() -> String {
    "npm test".to_string()
}

// Valor padrão para o limite diário: USD 50.
fn default_daily_limit_usd() -> f64 {
    50.0
}

// Valor padrão para o limite semanal: USD 200.
fn default_weekly_limit_usd() -> f64 {
    200.0
}

// Valor padrão para o custo substituto: USD 1.
fn default_fallback_cost_usd() -> f64 {
    1.0
}

// Valor padrão para o orçamento por invocação: USD 5.
fn default_invocation_budget_usd() -> f64 {
    5.0
}

impl Default for GreenloopConfig {
    fn default() -> Self {
        Self {
            token: String::new(),
            hub_base_url: default_hub_base_url(),
            agent_base_url: default_agent_base_url(),
            backlog_path: default_backlog_path(),
            workdir: default_workdir(),
            base_branch: default_base_branch(),
            max_attempts: default_max_attempts(),
            timeout_minutes: default_timeout_minutes(),
            staleness_minutes: default_staleness_minutes(),
            cadence_minutes: default_cadence_minutes(),
            auto_sync: default_auto_sync(),
            quality_command: default_quality_command(),
            functional_command: default_functional_command(),
            daily_limit_usd: default_daily_limit_usd(),
            weekly_limit_usd: default_weekly_limit_usd(),
            fallback_cost_usd: default_fallback_cost_usd(),
            invocation_budget_usd: default_invocation_budget_usd(),
        }
    }
}

impl GreenloopConfig {
    /// Carrega a configuração de `greenloop.toml` no diretório atual.
    /// Usa valores padrão se o arquivo não existir.
    pub fn load() -> Result<Self> {
        Self::load_from(Path::new("greenloop.toml"))
    }

    /// Carrega a configuração do caminho indicado.
    pub fn load_from(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(path)?;
            toml::from_str::<GreenloopConfig>(&contents)?
        } else {
            Self::default()
        };

        // Variável de ambiente tem precedência sobre o arquivo para o token.
        if let Ok(token) = std::env::var("GREENLOOP_TOKEN")
            && !token.is_empty()
        {
            config.token = token;
        }

        Ok(config)
    }

    /// Limites de custo no formato consumido pelo governador de custo.
    pub fn cost_limits(&self) -> CostLimits {
        CostLimits {
            daily_limit_usd: self.daily_limit_usd,
            weekly_limit_usd: self.weekly_limit_usd,
            fallback_cost_usd: self.fallback_cost_usd,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_values() {
        let config = GreenloopConfig::default();
        assert_eq!(config.max_attempts, 5);
        assert_eq!(config.staleness_minutes, 30);
        assert_eq!(config.base_branch, "main");
        assert_eq!(config.backlog_path, "backlog.json");
        assert!(config.auto_sync);
        assert!(config.token.is_empty());
    }

    #[test]
    fn deserialize_partial_toml() {
        let toml_str = r#"
            token = "gl-test-123"
            max_attempts = 3
            auto_sync = false
        "#;
        let config: GreenloopConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.token, "gl-test-123");
        assert_eq!(config.max_attempts, 3);
        assert!(!config.auto_sync);
        assert_eq!(config.staleness_minutes, 30);
        assert_eq!(config.daily_limit_usd, 50.0);
    }

    #[test]
    fn load_falls_back_to_defaults_for_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = GreenloopConfig::load_from(&dir.path().join("greenloop.toml")).unwrap();
        assert_eq!(config.max_attempts, 5);
    }

    #[test]
    fn cost_limits_mirror_the_config() {
        let mut config = GreenloopConfig::default();
        config.daily_limit_usd = 10.0;
        config.weekly_limit_usd = 40.0;

        let limits = config.cost_limits();
        assert_eq!(limits.daily_limit_usd, 10.0);
        assert_eq!(limits.weekly_limit_usd, 40.0);
        assert_eq!(limits.fallback_cost_usd, 1.0);
    }
}
