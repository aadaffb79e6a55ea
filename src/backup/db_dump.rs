// mysqlbackup/src/backup/db_dump.rs
use async_trait::async_trait;
use std::fs::File;
use std::io;
use std::path::Path;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::config::{DbConfig, PasswordChannel};
use crate::errors::{AppError, Result, Stage};
use crate::utils::find_dump_executable;

/// Produces a full logical dump of one database into a local file.
#[async_trait]
pub trait Dumper: Send + Sync {
    /// Writes the dump to `destination`. On failure the file may be left
    /// partially written; removing it is up to the caller.
    async fn produce_dump(&self, db: &DbConfig, destination: &Path) -> Result<()>;
}

/// Runs `mysqldump` (or a compatible tool) with the dump streamed straight to disk.
#[derive(Debug, Default, Clone, Copy)]
pub struct MysqlDump;

/// Builds the argument list. The password never goes into it.
pub fn build_dump_command(db: &DbConfig, program: &Path) -> Command {
    let mut command = Command::new(program);
    command
        .arg("-h")
        .arg(&db.host)
        .arg("-P")
        .arg(db.port.to_string());
    match db.password_channel {
        PasswordChannel::Stdin => {
            command.arg("-p");
        }
        PasswordChannel::Env => {
            command.env("MYSQL_PWD", &db.password);
        }
    }
    command.arg("-u").arg(&db.user).arg("--databases").arg(&db.name);
    command
}

#[async_trait]
impl Dumper for MysqlDump {
    async fn produce_dump(&self, db: &DbConfig, destination: &Path) -> Result<()> {
        let database = db.name.as_str();
        let fail = |what: &str, e: io::Error| {
            AppError::backup(database, Stage::Dump, format!("{}: {}", what, e))
        };

        let program = find_dump_executable(database, &db.dump_command)?;
        let dump_file = File::create(destination).map_err(|e| {
            fail(
                &format!("Failed to create dump file {}", destination.display()),
                e,
            )
        })?;

        let mut command = build_dump_command(db, &program);
        command
            .stdin(match db.password_channel {
                PasswordChannel::Stdin => Stdio::piped(),
                PasswordChannel::Env => Stdio::null(),
            })
            .stdout(Stdio::from(dump_file))
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        tracing::debug!(
            database,
            program = %program.display(),
            host = %db.host,
            port = db.port,
            user = %db.user,
            "Spawning dump tool"
        );
        let mut child = command
            .spawn()
            .map_err(|e| fail(&format!("Failed to execute {}", program.display()), e))?;

        if let Some(mut stdin) = child.stdin.take() {
            let mut password_line = db.password.clone().into_bytes();
            password_line.push(b'\n');
            match stdin.write_all(&password_line).await {
                Ok(()) => {}
                // The tool may exit (or never read stdin) before we are done writing.
                Err(e) if e.kind() == io::ErrorKind::BrokenPipe => {
                    tracing::debug!(database, "Dump tool closed stdin before reading the password");
                }
                Err(e) => return Err(fail("Failed to pass password to dump tool", e)),
            }
            drop(stdin);
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| fail("Failed to wait for dump tool", e))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(AppError::backup(
                database,
                Stage::Dump,
                format!(
                    "{} failed with status: {}\nStderr: {}",
                    program.display(),
                    output.status,
                    stderr
                ),
            ));
        }

        tracing::info!(database, path = %destination.display(), "Database dumped");
        Ok(())
    }
}
