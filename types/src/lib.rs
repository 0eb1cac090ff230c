//! gRPC types for the subset of the etcd v3 API shared by `etcd-kv` and
//! `mvcc-server`.
//!
//! Field numbers follow upstream etcd, so the generated clients talk to a real
//! etcd cluster as well as to the local store.

pub mod mvccpb {
    tonic::include_proto!("mvccpb");
}

pub mod etcdserverpb {
    tonic::include_proto!("etcdserverpb");
}
