//! Tipos de erro para o cliente do hub de issues.
//!
//! Define [`HubError`] com variantes para rate limiting, erros da API,
//! item inexistente e erros de rede. Usa `thiserror` para derivar `Display`
//! e `Error` automaticamente a partir dos atributos `#[error(...)]`.

use thiserror::Error;

/// Erros que podem ocorrer ao interagir com o hub de issues.
#[derive(Debug, Error)]
pub enum HubError {
    /// O hub retornou HTTP 429 (rate limit).
    /// O campo `retry_after_ms` indica quantos milissegundos esperar antes de retentar.
    #[error("rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    /// Erro retornado pelo hub (ex.: 401 token inválido, 500 erro interno).
    /// Contém o código de status HTTP e a mensagem de erro do corpo da resposta.
    #[error("hub error (status {status}): {message}")]
    ApiError { status: u16, message: String },

    /// O item pedido não existe no hub.
    #[error("item #{0} not found")]
    NotFound(u64),

    /// Falha de rede subjacente (DNS, conexão recusada, timeout).
    /// Encapsula o erro original do `reqwest` via `#[from]`.
    #[error("network error: {0}")]
    NetworkError(#[from] reqwest::Error),
}
