//! Integração com Git via libgit2 para sincronização de branches e detecção
//! de conflitos.
//!
//! O [`GitManager`] encapsula o checkout da branch de trabalho e a sondagem
//! de merge contra a branch base. O resultado da sondagem ([`SyncStatus`])
//! distingue conflitos verdadeiros de dois lados de falhas de merge sem
//! marcadores de conflito, distinção que alimenta o classificador de falhas.

use anyhow::{Context, Result};
use git2::{BranchType, Repository, Signature};
use std::fmt;
use std::path::Path;

/// Categoria de um conflito verdadeiro de dois lados no índice de merge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictKind {
    BothModified,
    BothAdded,
    BothDeleted,
    DeletedByUs,
    DeletedByThem,
}

impl fmt::Display for ConflictKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConflictKind::BothModified => write!(f, "both modified"),
            ConflictKind::BothAdded => write!(f, "both added"),
            ConflictKind::BothDeleted => write!(f, "both deleted"),
            ConflictKind::DeletedByUs => write!(f, "deleted by us"),
            ConflictKind::DeletedByThem => write!(f, "deleted by them"),
        }
    }
}

/// Um arquivo em conflito após a sondagem de merge.
#[derive(Debug, Clone, PartialEq)]
pub struct Conflict {
    pub path: String,
    pub kind: ConflictKind,
}

/// Resultado de uma sincronização da branch de trabalho com a base.
///
/// `merge_attempted && !merge_clean && conflicts.is_empty()` significa que o
/// passo de merge falhou sem nenhum marcador de conflito, um caso que deve
/// ser tratado como falha de infraestrutura e nunca como conflito.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncStatus {
    pub merge_attempted: bool,
    pub merge_clean: bool,
    pub behind_base: bool,
    pub conflicts: Vec<Conflict>,
    /// Texto do erro quando o próprio merge falhou.
    pub error: Option<String>,
}

impl SyncStatus {
    /// Branch já está em dia com a base; nada foi tentado.
    pub fn up_to_date() -> Self {
        Self {
            merge_attempted: false,
            merge_clean: true,
            behind_base: false,
            conflicts: Vec::new(),
            error: None,
        }
    }

    /// Branch atrás da base com merge automático desligado.
    pub fn behind() -> Self {
        Self {
            merge_attempted: false,
            merge_clean: true,
            behind_base: true,
            conflicts: Vec::new(),
            error: None,
        }
    }

    /// O passo de merge em si falhou, sem produzir marcadores de conflito.
    pub fn failed(error: String) -> Self {
        Self {
            merge_attempted: true,
            merge_clean: false,
            behind_base: true,
            conflicts: Vec::new(),
            error: Some(error),
        }
    }

    pub fn has_conflicts(&self) -> bool {
        !self.conflicts.is_empty()
    }
}

/// Gerenciador de operações Git usando a biblioteca libgit2.
pub struct GitManager {
    repo: Repository,
}

impl GitManager {
    /// Abre um repositório git existente no caminho fornecido.
    pub fn open(path: &Path) -> Result<Self> {
        let repo = Repository::open(path).context("failed to open git repository")?;
        Ok(Self { repo })
    }

    /// Retorna o nome da branch atual.
    pub fn current_branch(&self) -> Result<String> {
        let head = self.repo.head()?;
        let name = head
            .shorthand()
            .context("branch name is not valid UTF-8")?
            .to_string();
        Ok(name)
    }

    /// Cria e faz checkout de uma nova branch a partir do HEAD.
    pub fn create_branch(&self, name: &str) -> Result<()> {
        let head_commit = self.repo.head()?.peel_to_commit()?;
        self.repo.branch(name, &head_commit, false)?;
        self.checkout_branch(name)
    }

    /// Faz checkout de uma branch local existente, forçando o worktree.
    pub fn checkout_branch(&self, name: &str) -> Result<()> {
        let refname = format!("refs/heads/{name}");
        self.repo.set_head(&refname)?;
        self.repo
            .checkout_head(Some(git2::build::CheckoutBuilder::default().force()))?;
        Ok(())
    }

    /// Verifica se a branch atual (HEAD) está atrás de `base`, sem mesclar.
    pub fn is_behind(&self, base: &str) -> Result<bool> {
        let our = self.repo.head()?.peel_to_commit()?;
        let their = self
            .repo
            .find_branch(base, BranchType::Local)
            .with_context(|| format!("base branch '{base}' not found"))?
            .get()
            .peel_to_commit()?;
        let (_, behind) = self.repo.graph_ahead_behind(our.id(), their.id())?;
        Ok(behind > 0)
    }

    /// Sincroniza a branch atual (HEAD) com `base`.
    ///
    /// Se a branch está atrás da base, sonda o merge em memória. Conflitos
    /// verdadeiros são reportados sem tocar o worktree; um merge limpo vira
    /// um commit de merge e o worktree é atualizado.
    pub fn sync_with_base(&self, base: &str) -> Result<SyncStatus> {
        let our = self.repo.head()?.peel_to_commit()?;
        let their = self
            .repo
            .find_branch(base, BranchType::Local)
            .with_context(|| format!("base branch '{base}' not found"))?
            .get()
            .peel_to_commit()?;

        let (_, behind) = self.repo.graph_ahead_behind(our.id(), their.id())?;
        if behind == 0 {
            return Ok(SyncStatus::up_to_date());
        }

        let mut merged = self.repo.merge_commits(&our, &their, None)?;
        if merged.has_conflicts() {
            let mut conflicts = Vec::new();
            for entry in merged.conflicts()? {
                let entry = entry?;
                conflicts.push(describe_conflict(&entry));
            }
            return Ok(SyncStatus {
                merge_attempted: true,
                merge_clean: false,
                behind_base: true,
                conflicts,
                error: None,
            });
        }

        // Merge limpo: grava a árvore, cria o commit de merge e atualiza o
        // worktree da branch atual.
        let tree_oid = merged.write_tree_to(&self.repo)?;
        let tree = self.repo.find_tree(tree_oid)?;
        let sig = self
            .repo
            .signature()
            .or_else(|_| Signature::now("greenloop", "greenloop@localhost"))?;
        let message = format!("greenloop: merge {base}");
        self.repo
            .commit(Some("HEAD"), &sig, &sig, &message, &tree, &[&our, &their])?;
        self.repo
            .checkout_head(Some(git2::build::CheckoutBuilder::default().force()))?;

        Ok(SyncStatus {
            merge_attempted: true,
            merge_clean: true,
            behind_base: true,
            conflicts: Vec::new(),
            error: None,
        })
    }
}

/// Deriva a categoria do conflito a partir dos três estágios do índice.
fn describe_conflict(entry: &git2::IndexConflict) -> Conflict {
    let path_bytes = entry
        .our
        .as_ref()
        .or(entry.their.as_ref())
        .or(entry.ancestor.as_ref())
        .map(|e| e.path.clone())
        .unwrap_or_default();
    let path = String::from_utf8_lossy(&path_bytes).into_owned();

    let kind = match (&entry.ancestor, &entry.our, &entry.their) {
        (Some(_), Some(_), Some(_)) => ConflictKind::BothModified,
        (None, Some(_), Some(_)) => ConflictKind::BothAdded,
        (Some(_), None, None) => ConflictKind::BothDeleted,
        (Some(_), None, Some(_)) => ConflictKind::DeletedByUs,
        (Some(_), Some(_), None) => ConflictKind::DeletedByThem,
        // Um único estágio presente não é um conflito de dois lados de
        // verdade; classificado como modificação para não ser descartado.
        _ => ConflictKind::BothModified,
    };

    Conflict { path, kind }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::PathBuf;
    use tempfile::TempDir;

    #[test]
    fn open_fails_on_non_repo_path() {
        let result = GitManager::open(&PathBuf::from("/tmp/definitely_not_a_repo_xyz"));
        assert!(result.is_err());
    }

    /// Auxiliar: cria um repositório temporário com um commit inicial para que HEAD exista.
    fn setup_temp_repo() -> (TempDir, GitManager, String) {
        let tmp = TempDir::new().unwrap();
        let repo = Repository::init(tmp.path()).unwrap();

        // Cria um commit inicial para que HEAD seja válido.
        let sig = Signature::now("test", "test@test.com").unwrap();
        let mut index = repo.index().unwrap();
        let tree_oid = index.write_tree().unwrap();
        let tree = repo.find_tree(tree_oid).unwrap();
        repo.commit(Some("HEAD"), &sig, &sig, "initial", &tree, &[])
            .unwrap();

        drop(tree);
        drop(repo);
        let gm = GitManager::open(tmp.path()).unwrap();
        let base = gm.current_branch().unwrap();
        (tmp, gm, base)
    }

    /// Auxiliar: escreve (ou remove) um arquivo e commita na branch atual.
    fn commit_change(dir: &Path, gm: &GitManager, file: &str, content: Option<&str>, message: &str) {
        match content {
            Some(text) => fs::write(dir.join(file), text).unwrap(),
            None => fs::remove_file(dir.join(file)).unwrap(),
        }

        let mut index = gm.repo.index().unwrap();
        match content {
            Some(_) => index.add_path(Path::new(file)).unwrap(),
            None => index.remove_path(Path::new(file)).unwrap(),
        }
        index.write().unwrap();

        let tree_oid = index.write_tree().unwrap();
        let tree = gm.repo.find_tree(tree_oid).unwrap();
        let sig = Signature::now("test", "test@test.com").unwrap();
        let parent = gm.repo.head().unwrap().peel_to_commit().unwrap();
        gm.repo
            .commit(Some("HEAD"), &sig, &sig, message, &tree, &[&parent])
            .unwrap();
    }

    #[test]
    fn create_branch_switches_head() {
        let (_tmp, gm, _base) = setup_temp_repo();
        gm.create_branch("greenloop/app.tables.create").unwrap();
        assert_eq!(gm.current_branch().unwrap(), "greenloop/app.tables.create");
    }

    #[test]
    fn sync_up_to_date_attempts_nothing() {
        let (_tmp, gm, base) = setup_temp_repo();
        gm.create_branch("greenloop/x").unwrap();

        let status = gm.sync_with_base(&base).unwrap();
        assert_eq!(status, SyncStatus::up_to_date());
    }

    #[test]
    fn is_behind_detects_base_movement_without_merging() {
        let (tmp, gm, base) = setup_temp_repo();
        gm.create_branch("greenloop/x").unwrap();
        assert!(!gm.is_behind(&base).unwrap());

        gm.checkout_branch(&base).unwrap();
        commit_change(tmp.path(), &gm, "other.txt", Some("newer\n"), "advance base");
        gm.checkout_branch("greenloop/x").unwrap();

        assert!(gm.is_behind(&base).unwrap());
        // A consulta não cria commit de merge.
        let head = gm.repo.head().unwrap().peel_to_commit().unwrap();
        assert_eq!(head.parent_count(), 1);
    }

    #[test]
    fn sync_behind_base_merges_cleanly() {
        let (tmp, gm, base) = setup_temp_repo();
        commit_change(tmp.path(), &gm, "data.txt", Some("base\n"), "add data");
        gm.create_branch("greenloop/x").unwrap();
        commit_change(tmp.path(), &gm, "branch.txt", Some("work\n"), "branch work");

        // Avança a base de forma independente.
        gm.checkout_branch(&base).unwrap();
        commit_change(tmp.path(), &gm, "other.txt", Some("newer\n"), "advance base");
        gm.checkout_branch("greenloop/x").unwrap();

        let status = gm.sync_with_base(&base).unwrap();
        assert!(status.merge_attempted);
        assert!(status.merge_clean);
        assert!(status.behind_base);
        assert!(!status.has_conflicts());

        // O commit de merge tem dois pais e o worktree recebeu o arquivo da base.
        let head = gm.repo.head().unwrap().peel_to_commit().unwrap();
        assert_eq!(head.parent_count(), 2);
        assert!(tmp.path().join("other.txt").exists());
    }

    #[test]
    fn sync_reports_both_modified_conflict() {
        let (tmp, gm, base) = setup_temp_repo();
        commit_change(tmp.path(), &gm, "data.txt", Some("original\n"), "add data");
        gm.create_branch("greenloop/x").unwrap();
        commit_change(tmp.path(), &gm, "data.txt", Some("branch version\n"), "branch edit");

        gm.checkout_branch(&base).unwrap();
        commit_change(tmp.path(), &gm, "data.txt", Some("base version\n"), "base edit");
        gm.checkout_branch("greenloop/x").unwrap();

        let status = gm.sync_with_base(&base).unwrap();
        assert!(status.merge_attempted);
        assert!(!status.merge_clean);
        assert!(status.has_conflicts());
        assert_eq!(status.conflicts[0].path, "data.txt");
        assert_eq!(status.conflicts[0].kind, ConflictKind::BothModified);

        // A sondagem não toca a branch: HEAD continua sem commit de merge.
        let head = gm.repo.head().unwrap().peel_to_commit().unwrap();
        assert_eq!(head.parent_count(), 1);
    }

    #[test]
    fn sync_reports_deleted_by_us_conflict() {
        let (tmp, gm, base) = setup_temp_repo();
        commit_change(tmp.path(), &gm, "data.txt", Some("original\n"), "add data");
        gm.create_branch("greenloop/x").unwrap();
        commit_change(tmp.path(), &gm, "data.txt", None, "branch deletes");

        gm.checkout_branch(&base).unwrap();
        commit_change(tmp.path(), &gm, "data.txt", Some("modified\n"), "base edits");
        gm.checkout_branch("greenloop/x").unwrap();

        let status = gm.sync_with_base(&base).unwrap();
        assert!(status.has_conflicts());
        assert_eq!(status.conflicts[0].kind, ConflictKind::DeletedByUs);
    }

    #[test]
    fn sync_missing_base_is_an_error() {
        let (_tmp, gm, _base) = setup_temp_repo();
        let result = gm.sync_with_base("does-not-exist");
        assert!(result.is_err());
    }
}
