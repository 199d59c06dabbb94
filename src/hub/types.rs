//! Tipos de dados trocados com o hub de issues: itens rastreados,
//! comentários e registros de execução.
//!
//! Todas as structs derivam `Serialize` e `Deserialize` para conversão JSON
//! conforme o formato dos endpoints REST do hub. O núcleo de orquestração
//! trata tudo aqui como snapshot somente-leitura: nada é cacheado entre
//! invocações.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Qual pipeline produziu um registro de execução.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    /// Uma execução de verificação (testes + qualidade).
    Verification,
    /// Uma execução do agente autônomo.
    Agent,
}

/// Status de ciclo de vida de um registro de execução.
///
/// `Queued` e `Running` são não-terminais; um registro pode ficar preso em
/// qualquer um deles indefinidamente após falhas de infraestrutura (uma
/// "execução fantasma"), e por isso todo chamador passa os registros pelo
/// filtro de staleness antes de tratá-los como ativos.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    Queued,
    Running,
    Success,
    Failure,
}

impl RecordStatus {
    /// Se o status é terminal (o registro é imutável a partir daqui).
    pub fn is_terminal(self) -> bool {
        matches!(self, RecordStatus::Success | RecordStatus::Failure)
    }
}

/// Uma execução observada do pipeline de verificação ou do agente.
///
/// Produzido pelo runner externo, consumido somente-leitura. `cost_usd`
/// permanece `None` até o runner resolvê-lo; o governador de custo recorre a
/// varrer `log_tail` (e em último caso a um custo substituto fixo) quando o
/// campo estruturado está ausente.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRecord {
    /// Identificador do registro (gerado pelo hub).
    pub id: u64,
    /// Pipeline que produziu o registro.
    pub kind: RecordKind,
    /// Status atual do registro.
    pub status: RecordStatus,
    /// Quando a execução começou.
    pub started_at: DateTime<Utc>,
    /// Última atualização observada. Base do filtro de staleness.
    pub updated_at: DateTime<Utc>,
    /// Custo resolvido em USD, quando o runner já o reportou.
    #[serde(default)]
    pub cost_usd: Option<f64>,
    /// Se a execução terminou em erro.
    #[serde(default)]
    pub is_error: bool,
    /// Subtipo estruturado do resultado (ex.: "error_max_turns").
    #[serde(default)]
    pub result_subtype: Option<String>,
    /// Branch contra a qual a execução rodou, quando o hub reporta uma.
    /// É assim que registros são associados de volta a um item rastreado.
    #[serde(default)]
    pub branch: Option<String>,
    /// Trecho final do log da execução, conforme reportado pelo hub.
    #[serde(default)]
    pub log_tail: String,
}

/// Comentário append-only em um item rastreado.
///
/// Comentários servem tanto de transcrição legível quanto de ledger de
/// dedup: um corpo carregando o marcador de trigger mais o token exato
/// `attempt a/m` é o fato canônico "esta tentativa já foi disparada".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Comment {
    /// Identificador do comentário (gerado pelo hub).
    pub id: u64,
    /// Corpo textual do comentário.
    pub body: String,
    /// Quando o comentário foi criado.
    pub created_at: DateTime<Utc>,
}

/// Leitura fresca dos campos externos de um item rastreado.
///
/// A máquina de estados reconstrói o estado completo a partir disto a cada
/// avaliação; nenhuma cópia em processo sobrevive entre invocações.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssueSnapshot {
    /// Número do item no hub.
    pub number: u64,
    /// Título estruturado codificando spec id e contador de tentativas.
    pub title: String,
    /// Conjunto de labels codificando o estado.
    pub labels: Vec<String>,
}
