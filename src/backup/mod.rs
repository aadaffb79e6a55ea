pub(crate) mod archive;   // gzip compression of the raw dump
pub(crate) mod cleanup;   // scoped removal of temporary backup files
pub(crate) mod db_dump;   // mysqldump invocation
mod logic;
pub(crate) mod s3_upload; // S3 interactions

pub use db_dump::MysqlDump;
pub use logic::BackupPipeline;
pub use s3_upload::S3Uploader;

#[cfg(test)]
pub(crate) use logic::tests as fixtures;
