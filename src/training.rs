//! Materialization of the training file from the corpus
//!
//! The corpus is a text file with one sequence per line and whitespace
//! separated tokens. Tagged corpora carry a part-of-speech tag on every token,
//! as in `fox/NN`. The engine never counts the corpus directly, but a
//! `training` copy of it inside of the working directory, which is tagged on
//! the way if some pattern needs tags.

use crate::{
    error::CountError,
    paths::Paths,
    status::{Status, Training},
    Result,
};
use anyhow::Context;
use std::{
    fs::{self, File},
    io::{BufRead, BufReader},
    path::{Path, PathBuf},
    process::{Command, Stdio},
};

/// Number of non-empty lines inspected to tell whether a file is tagged
const TAG_DETECTION_LINES: usize = 10;

/// Part-of-speech tagging collaborator
pub trait Tagger: Send + Sync {
    /// Read an untagged file and write its tagged version
    fn tag(&self, untagged: &Path, tagged: &Path) -> Result<()>;
}

/// Tagger to be used when no tagging tool is available
///
/// Fails loudly whenever tagging turns out to be needed.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoTagger;
//
impl Tagger for NoTagger {
    fn tag(&self, untagged: &Path, _tagged: &Path) -> Result<()> {
        Err(CountError::TaggerUnavailable(untagged.to_owned()).into())
    }
}

/// Tagger backed by an external program
///
/// The program receives the untagged text on its standard input and must
/// write the tagged text to its standard output.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommandTagger {
    /// Program to be run
    program: PathBuf,

    /// Arguments of the program
    args: Vec<String>,
}
//
impl CommandTagger {
    /// Parse a shell-like command line, without quoting support
    pub fn from_command_line(command: &str) -> Result<Self> {
        let mut words = command.split_whitespace();
        let program = words.next().context("empty tagger command")?;
        Ok(Self {
            program: program.into(),
            args: words.map(str::to_owned).collect(),
        })
    }
}
//
impl Tagger for CommandTagger {
    fn tag(&self, untagged: &Path, tagged: &Path) -> Result<()> {
        log::info!(
            "Tagging {} -> {} with {}",
            untagged.display(),
            tagged.display(),
            self.program.display()
        );
        let input = File::open(untagged)
            .with_context(|| format!("opening {} for tagging", untagged.display()))?;
        let output = File::create(tagged)
            .with_context(|| format!("creating tagged file {}", tagged.display()))?;
        let status = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::from(input))
            .stdout(Stdio::from(output))
            .status()
            .with_context(|| format!("running tagger {}", self.program.display()))?;
        anyhow::ensure!(status.success(), "tagger {} failed with {status}", self.program.display());
        Ok(())
    }
}

/// Split a tagged token into its word and part-of-speech tag
pub fn split_tagged(token: &str) -> Option<(&str, &str)> {
    let (word, tag) = token.rsplit_once('/')?;
    (!word.is_empty() && !tag.is_empty()).then_some((word, tag))
}

/// Split a line into words and part-of-speech tags
///
/// For untagged lines, or tokens lacking a tag, the word stands in for its
/// tag so that both sequences always have the same length.
pub fn parse_line(line: &str, tagged: bool) -> (Vec<&str>, Vec<&str>) {
    if !tagged {
        let words = line.split_whitespace().collect::<Vec<_>>();
        let pos = words.clone();
        return (words, pos);
    }
    line.split_whitespace()
        .map(|token| split_tagged(token).unwrap_or((token, token)))
        .unzip()
}

/// Truth that a text file is tagged
///
/// A file is deemed tagged when every token of its first non-empty lines
/// carries a part-of-speech tag. Empty files are untagged.
pub fn detect_file_tagged(path: &Path) -> Result<bool> {
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let mut seen_token = false;
    let mut lines_seen = 0;
    for line in BufReader::new(file).lines() {
        let line = line.with_context(|| format!("reading {}", path.display()))?;
        if line.trim().is_empty() {
            continue;
        }
        for token in line.split_whitespace() {
            if split_tagged(token).is_none() {
                return Ok(false);
            }
            seen_token = true;
        }
        lines_seen += 1;
        if lines_seen == TAG_DETECTION_LINES {
            break;
        }
    }
    Ok(seen_token)
}

/// Make sure the training file is present, and tagged if needed
///
/// Training state only ever moves forward (`none` to `untagged` or `tagged`,
/// `untagged` to `tagged`), and is recorded in the ledger once the training
/// file is complete.
pub fn provide_training(
    status: &Status,
    paths: &Paths,
    corpus: &Path,
    needs_tagging: bool,
    tagger: &dyn Tagger,
) -> Result<()> {
    let training = status.training();
    if training == Training::Tagged {
        log::info!("Detected tagged training already present.");
        return Ok(());
    }

    let training_file = paths.training_file();
    if !needs_tagging {
        if training == Training::Untagged {
            log::info!("Detected training already present.");
            return Ok(());
        }
        copy_corpus(corpus, &training_file)?;
        return status.set_training(if status.is_corpus_tagged() {
            Training::Tagged
        } else {
            Training::Untagged
        });
    }

    if status.is_corpus_tagged() {
        copy_corpus(corpus, &training_file)?;
    } else {
        let untagged = paths.untagged_training_file();
        copy_corpus(corpus, &untagged)?;
        remove_if_exists(&training_file)?;
        tagger
            .tag(&untagged, &training_file)
            .with_context(|| format!("tagging {}", untagged.display()))?;
    }
    status.set_training(Training::Tagged)
}

/// Copy the corpus to some location of the working directory
fn copy_corpus(corpus: &Path, destination: &Path) -> Result<()> {
    if same_file(corpus, destination) {
        return Ok(());
    }
    log::debug!("Copying {} -> {}", corpus.display(), destination.display());
    remove_if_exists(destination)?;
    fs::copy(corpus, destination).with_context(|| {
        format!(
            "copying corpus {} to {}",
            corpus.display(),
            destination.display()
        )
    })?;
    Ok(())
}

/// Truth that two paths designate the same existing file
fn same_file(a: &Path, b: &Path) -> bool {
    match (fs::canonicalize(a), fs::canonicalize(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

/// Remove a file, if it exists
fn remove_if_exists(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e).with_context(|| format!("removing {}", path.display())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn tagged_tokens() {
        assert_eq!(split_tagged("fox/NN"), Some(("fox", "NN")));
        assert_eq!(split_tagged("1/2/CD"), Some(("1/2", "CD")));
        assert_eq!(split_tagged("fox"), None);
        assert_eq!(split_tagged("fox/"), None);
        assert_eq!(split_tagged("/NN"), None);
    }

    #[test]
    fn line_parsing() {
        assert_eq!(
            parse_line("the  quick fox", false),
            (vec!["the", "quick", "fox"], vec!["the", "quick", "fox"])
        );
        assert_eq!(
            parse_line("the/DT fox/NN", true),
            (vec!["the", "fox"], vec!["DT", "NN"])
        );
    }

    #[test]
    fn tag_detection() {
        let dir = TempDir::new().unwrap();
        let tagged = dir.path().join("tagged");
        fs::write(&tagged, "\nthe/DT fox/NN\nruns/VBZ\n").unwrap();
        assert!(detect_file_tagged(&tagged).unwrap());
        let untagged = dir.path().join("untagged");
        fs::write(&untagged, "the/DT fox\n").unwrap();
        assert!(!detect_file_tagged(&untagged).unwrap());
        let empty = dir.path().join("empty");
        fs::write(&empty, "").unwrap();
        assert!(!detect_file_tagged(&empty).unwrap());
    }

    #[test]
    fn missing_tagger_fails_loudly() {
        let error = NoTagger
            .tag(Path::new("training.untagged"), Path::new("training"))
            .unwrap_err();
        assert!(matches!(
            error.downcast_ref::<CountError>(),
            Some(CountError::TaggerUnavailable(_))
        ));
    }

    #[test]
    fn command_line_parsing() {
        let tagger = CommandTagger::from_command_line("tagger --model en").unwrap();
        assert_eq!(tagger.program, PathBuf::from("tagger"));
        assert_eq!(tagger.args, ["--model", "en"]);
        assert!(CommandTagger::from_command_line("  ").is_err());
    }
}
