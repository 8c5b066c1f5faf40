pub mod quoted_view;
