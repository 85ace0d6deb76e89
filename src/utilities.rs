pub mod multi_index_manipulation;
