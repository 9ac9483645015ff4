mod library_ops;
