pub mod clob;
