pub mod cjk;
pub mod fence;
pub mod stopwords;
pub mod text;
