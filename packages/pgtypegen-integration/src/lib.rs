mod common;
mod inline_annotations;
mod nullability;
mod sql_files;
